use crate::il::{InstructionStream, OpCode, StubEmitter};
use crate::types::Type;

/// The storage location currently holding a value: an argument slot or a
/// local slot, held directly or through a managed pointer.
///
/// Loading goes through the extra indirection transparently; storing through
/// a by-ref home is a protocol violation. The templates dereference by-ref
/// locations into plain locals up front and write back explicitly, because an
/// indirect store needs its target address below the value on the stack.
#[derive(Debug, Copy, Clone)]
pub enum Home<'l> {
	Arg { index: u16, ty: &'l Type<'l> },
	ByRefArg { index: u16, ty: &'l Type<'l> },
	Local { slot: u16, ty: &'l Type<'l> },
	ByRefLocal { slot: u16, ty: &'l Type<'l> },
}

impl<'l> Home<'l> {
	pub fn ty(&self) -> &'l Type<'l> {
		match *self {
			Home::Arg { ty, .. }
			| Home::ByRefArg { ty, .. }
			| Home::Local { ty, .. }
			| Home::ByRefLocal { ty, .. } => ty,
		}
	}

	pub fn load_value(&self, stream: &mut InstructionStream, emitter: &mut StubEmitter<'l>) {
		match *self {
			Home::Arg { index, .. } => stream.emit(OpCode::ldarg(index)),
			Home::ByRefArg { index, ty } => {
				stream.emit(OpCode::ldarg(index));
				stream.emit(OpCode::ldobj(emitter.type_token(ty)));
			}
			Home::Local { slot, .. } => stream.emit(OpCode::ldloc(slot)),
			Home::ByRefLocal { slot, ty } => {
				stream.emit(OpCode::ldloc(slot));
				stream.emit(OpCode::ldobj(emitter.type_token(ty)));
			}
		}
	}

	pub fn load_address(&self, stream: &mut InstructionStream, _emitter: &mut StubEmitter<'l>) {
		match *self {
			Home::Arg { index, .. } => stream.emit(OpCode::ldarga(index)),
			Home::ByRefArg { index, .. } => stream.emit(OpCode::ldarg(index)),
			Home::Local { slot, .. } => stream.emit(OpCode::ldloca(slot)),
			Home::ByRefLocal { slot, .. } => stream.emit(OpCode::ldloc(slot)),
		}
	}

	/// Precondition: `self` is not a by-ref location.
	pub fn store_value(&self, stream: &mut InstructionStream, _emitter: &mut StubEmitter<'l>) {
		match *self {
			Home::Arg { index, .. } => stream.emit(OpCode::starg(index)),
			Home::Local { slot, .. } => stream.emit(OpCode::stloc(slot)),
			Home::ByRefArg { .. } | Home::ByRefLocal { .. } => {
				unreachable!("store through a by-ref home")
			}
		}
	}
}
