use std::fmt::{Debug, Formatter};

use derivative::Derivative;

use crate::tokens::{HelperMethod, MetadataToken, TokenResolver};
use crate::types::Type;

macro_rules! debug_opcode {
	($name: ident, $f: expr, $self: expr, $ident: ident) => {
		if $name::$ident == *$self {
			return write!($f, "{}", stringify!($ident));
		}
	};
	($name: ident, $f: expr, $self: expr, $ident: ident ($ty: ty)) => {
		if let $name::$ident(v) = $self {
			return write!($f, "{}({:X?})", stringify!($ident), v);
		}
	};
}

macro_rules! define_opcodes {
	(
		enum $name: ident {
			$(
				$(#[$attr:meta])*
				$ident: ident $(($ty: ty))?
			),*
		}
	) => {
		#[allow(non_camel_case_types)]
		#[derive(Copy, Clone, PartialEq)]
		pub enum $name {
			$(
				$(#[$attr])*
				$ident $(($ty))?
			),*
		}

		impl Debug for $name {
			fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
				$(debug_opcode! { $name, f, self, $ident $(($ty))? })*
				Ok(())
			}
		}
	};
}

define_opcodes! {
	enum OpCode {
		/// Do nothing (No operation).
		nop,
		/// Load argument numbered num onto the stack.
		ldarg(u16),
		/// Fetch the address of argument argNum.
		ldarga(u16),
		/// Store value to the argument numbered num.
		starg(u16),
		/// Load local variable of index indx onto stack.
		ldloc(u16),
		/// Load address of local variable with index indx.
		ldloca(u16),
		/// Pop a value from stack into local variable indx.
		stloc(u16),
		/// Push num of type int32 onto the stack as int32.
		ldc_i4(i32),
		/// Push a null reference on the stack.
		ldnull,
		/// Duplicate the value on the top of the stack.
		dup,
		/// Pop value from the stack.
		pop,
		/// Add two values, returning a new value.
		add,
		/// Subtract value2 from value1, returning a new value.
		sub,
		/// Multiply values.
		mul,
		/// Push 1 (of type int32) if value1 equals value2, else push 0.
		ceq,
		/// Convert to native int, pushing native int on stack.
		conv_i,
		/// Convert to native unsigned int, pushing native int on stack.
		conv_u,
		/// Convert to int8, pushing int32 on stack.
		conv_i1,
		/// Convert to unsigned int8, pushing int32 on stack.
		conv_u1,
		/// Convert to int16, pushing int32 on stack.
		conv_i2,
		/// Convert to unsigned int16, pushing int32 on stack.
		conv_u2,
		/// Convert to int32, pushing int32 on stack.
		conv_i4,
		/// Convert to unsigned int32, pushing int32 on stack.
		conv_u4,
		/// Convert to int64, pushing int64 on stack.
		conv_i8,
		/// Branch to target.
		br(Label),
		/// Branch to target if value is zero (false).
		brfalse(Label),
		/// Branch to target if value is non-zero (true).
		brtrue(Label),
		/// Branch to target if less than.
		blt(Label),
		/// Mark the position of a label; resolved by the back-end.
		label(Label),
		/// Call method described by method.
		call(MetadataToken),
		/// Call a method associated with an object.
		callvirt(MetadataToken),
		/// Allocate an uninitialized object or value type and call ctor.
		newobj(MetadataToken),
		/// Create a new array with elements of type etype.
		newarr(MetadataToken),
		/// Push the length (of type native unsigned int) of array on the stack.
		ldlen,
		/// Load the element at index onto the top of the stack.
		ldelem(MetadataToken),
		/// Replace array element at index with the value on the stack.
		stelem(MetadataToken),
		/// Load the address of element at index onto the top of the stack.
		ldelema(MetadataToken),
		/// Copy the value stored at address src to the stack.
		ldobj(MetadataToken),
		/// Store a value of type typeTok at an address.
		stobj(MetadataToken),
		/// Initialize the value at address dest.
		initobj(MetadataToken),
		/// Push the size, in bytes, of a type as an unsigned int32.
		sizeof(MetadataToken),
		/// Return from method, possibly with a value.
		ret
	}
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Label(pub(crate) u32);

/// A local variable slot of the stub under construction. Pinned slots fix
/// their referent for the lifetime of the stub frame.
#[derive(Debug, Copy, Clone)]
pub struct LocalDef<'l> {
	pub ty: &'l Type<'l>,
	pub pinned: bool,
}

/// Vends local slots, labels and metadata tokens to the marshallers.
/// Symbols are resolved through the host's [`TokenResolver`] and memoised
/// on its side.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct StubEmitter<'l> {
	locals: Vec<LocalDef<'l>>,
	labels: u32,
	#[derivative(Debug = "ignore")]
	resolver: Box<dyn TokenResolver>,
}

impl<'l> StubEmitter<'l> {
	pub fn new(resolver: Box<dyn TokenResolver>) -> Self {
		Self { locals: vec![], labels: 0, resolver }
	}

	pub fn new_local(&mut self, ty: &'l Type<'l>) -> u16 {
		self.locals.push(LocalDef { ty, pinned: false });
		(self.locals.len() - 1) as u16
	}

	pub fn new_pinned_local(&mut self, ty: &'l Type<'l>) -> u16 {
		self.locals.push(LocalDef { ty, pinned: true });
		(self.locals.len() - 1) as u16
	}

	pub fn new_label(&mut self) -> Label {
		let label = Label(self.labels);
		self.labels += 1;
		label
	}

	#[inline]
	pub fn type_token(&mut self, ty: &Type) -> MetadataToken {
		self.resolver.type_token(ty)
	}

	#[inline]
	pub fn helper_token(&mut self, helper: HelperMethod) -> MetadataToken {
		self.resolver.helper_token(helper)
	}

	#[inline]
	pub fn ctor_token(&mut self, ty: &Type) -> MetadataToken {
		self.resolver.default_ctor_token(ty)
	}

	pub fn locals(&self) -> &[LocalDef<'l>] {
		&self.locals
	}

	pub fn resolver(&self) -> &dyn TokenResolver {
		&*self.resolver
	}
}

/// An append-only run of instructions. Streams are only ever extended during
/// generation; their relative order is fixed by [`CodeStreams::assemble`].
#[derive(Default, Clone)]
pub struct InstructionStream {
	instructions: Vec<OpCode>,
}

impl InstructionStream {
	#[inline]
	pub fn emit(&mut self, opcode: OpCode) {
		self.instructions.push(opcode);
	}

	#[inline]
	pub fn bind_label(&mut self, label: Label) {
		self.emit(OpCode::label(label));
	}

	#[inline]
	pub fn instructions(&self) -> &[OpCode] {
		&self.instructions
	}

	#[inline]
	pub fn len(&self) -> usize {
		self.instructions.len()
	}

	#[inline]
	pub fn is_empty(&self) -> bool {
		self.instructions.is_empty()
	}
}

impl Debug for InstructionStream {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		let mut dbg = f.debug_list();
		for (i, opcode) in self.instructions.iter().enumerate() {
			dbg.entry(&format_args!("IL_{i:04}\t{opcode:?}"));
		}
		dbg.finish()
	}
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum StreamId {
	Marshalling,
	CallSiteSetup,
	Unmarshalling,
	Cleanup,
	ReturnValue,
}

/// The per-stub bundle of instruction streams shared by every marshaller.
///
/// The final stub concatenates them in the fixed order
/// marshalling → call-site-setup → \[native call] → unmarshalling → cleanup →
/// return-value; the native call itself is placed by the back-end. The
/// cleanup stream is the guaranteed-execution region: the back-end must make
/// it reachable from both normal return and exceptional unwind.
#[derive(Debug)]
pub struct CodeStreams<'l> {
	pub marshalling: InstructionStream,
	pub call_site_setup: InstructionStream,
	pub unmarshalling: InstructionStream,
	pub cleanup: InstructionStream,
	pub return_value: InstructionStream,
	pub emitter: StubEmitter<'l>,
}

impl<'l> CodeStreams<'l> {
	pub fn new(resolver: Box<dyn TokenResolver>) -> Self {
		Self {
			marshalling: Default::default(),
			call_site_setup: Default::default(),
			unmarshalling: Default::default(),
			cleanup: Default::default(),
			return_value: Default::default(),
			emitter: StubEmitter::new(resolver),
		}
	}

	/// Splits out one stream together with the emitter, so callers can
	/// append instructions and allocate locals/labels/tokens at once.
	pub fn stream(&mut self, id: StreamId) -> (&mut InstructionStream, &mut StubEmitter<'l>) {
		let stream = match id {
			StreamId::Marshalling => &mut self.marshalling,
			StreamId::CallSiteSetup => &mut self.call_site_setup,
			StreamId::Unmarshalling => &mut self.unmarshalling,
			StreamId::Cleanup => &mut self.cleanup,
			StreamId::ReturnValue => &mut self.return_value,
		};
		(stream, &mut self.emitter)
	}

	pub fn assemble(&self) -> Vec<OpCode> {
		let mut code = Vec::with_capacity(
			self.marshalling.len()
				+ self.call_site_setup.len()
				+ self.unmarshalling.len()
				+ self.cleanup.len()
				+ self.return_value.len(),
		);
		code.extend_from_slice(self.marshalling.instructions());
		code.extend_from_slice(self.call_site_setup.instructions());
		code.extend_from_slice(self.unmarshalling.instructions());
		code.extend_from_slice(self.cleanup.instructions());
		code.extend_from_slice(self.return_value.instructions());
		code
	}
}
