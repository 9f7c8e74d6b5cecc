use crate::il::{CodeStreams, OpCode, StreamId};
use crate::marshal::home::Home;
use crate::marshal::marshaller::Marshaller;
use crate::tokens::HelperMethod;
use crate::types::PrimitiveType;

impl<'l> Marshaller<'l> {
	/// SafeHandle arguments. By-value handles are reference-counted around
	/// the call: `DangerousAddRef` (tracked by a bool), pass
	/// `DangerousGetHandle`, then a guarded `DangerousRelease` after the
	/// call. Out by-ref handles get a fresh handle object up front, a
	/// pointer-sized out cell at the call site, and `SetHandle` plus the
	/// by-ref write-back afterwards.
	pub(crate) fn emit_safe_handle_argument_forward(&mut self, s: &mut CodeStreams<'l>) {
		let intptr = self.pool.get_primitive(PrimitiveType::IntPtr);
		if self.is_managed_by_ref {
			let handle = s.emitter.new_local(self.managed_type);
			let native = s.emitter.new_local(intptr);
			self.managed_home = Some(Home::Local { slot: handle, ty: self.managed_type });
			self.native_home = Some(Home::Local { slot: native, ty: intptr });
			{
				let (stream, emitter) = s.stream(StreamId::Marshalling);
				let ctor = emitter.ctor_token(self.managed_type);
				stream.emit(OpCode::newobj(ctor));
				stream.emit(OpCode::stloc(handle));
			}
			{
				let (stream, _) = s.stream(StreamId::CallSiteSetup);
				stream.emit(OpCode::ldloca(native));
			}
			let (stream, emitter) = s.stream(StreamId::Unmarshalling);
			stream.emit(OpCode::ldloc(handle));
			stream.emit(OpCode::ldloc(native));
			let set_handle = emitter.helper_token(HelperMethod::SafeHandleSetHandle);
			stream.emit(OpCode::callvirt(set_handle));
			stream.emit(OpCode::ldarg(self.index - 1));
			stream.emit(OpCode::ldloc(handle));
			let token = emitter.type_token(self.managed_type);
			stream.emit(OpCode::stobj(token));
		} else {
			let boolean = self.pool.get_primitive(PrimitiveType::Boolean);
			let addrefd = s.emitter.new_local(boolean);
			let native = s.emitter.new_local(intptr);
			self.native_home = Some(Home::Local { slot: native, ty: intptr });
			let skip = s.emitter.new_label();
			{
				let (stream, emitter) = s.stream(StreamId::Marshalling);
				stream.emit(OpCode::ldarg(self.index - 1));
				stream.emit(OpCode::ldloca(addrefd));
				let add_ref = emitter.helper_token(HelperMethod::SafeHandleDangerousAddRef);
				stream.emit(OpCode::callvirt(add_ref));
				stream.emit(OpCode::ldarg(self.index - 1));
				let get_handle = emitter.helper_token(HelperMethod::SafeHandleDangerousGetHandle);
				stream.emit(OpCode::callvirt(get_handle));
				stream.emit(OpCode::stloc(native));
			}
			{
				let (stream, _) = s.stream(StreamId::CallSiteSetup);
				stream.emit(OpCode::ldloc(native));
			}
			// the release must run even if the native call throws; the
			// back-end keeps this stream on the unwind path
			let (stream, emitter) = s.stream(StreamId::Unmarshalling);
			stream.emit(OpCode::ldloc(addrefd));
			stream.emit(OpCode::brfalse(skip));
			stream.emit(OpCode::ldarg(self.index - 1));
			let release = emitter.helper_token(HelperMethod::SafeHandleDangerousRelease);
			stream.emit(OpCode::callvirt(release));
			stream.bind_label(skip);
		}
	}

	/// Wraps a raw native handle in a fresh managed handle object. Used for
	/// handle returns and reverse handle arguments.
	pub(crate) fn emit_safe_handle_materialize(&mut self, s: &mut CodeStreams<'l>, target: StreamId) {
		let (stream, emitter) = s.stream(target);
		let ctor = emitter.ctor_token(self.managed_type);
		stream.emit(OpCode::newobj(ctor));
		self.managed_home.unwrap().store_value(stream, emitter);
		self.managed_home.unwrap().load_value(stream, emitter);
		self.native_home.unwrap().load_value(stream, emitter);
		let set_handle = emitter.helper_token(HelperMethod::SafeHandleSetHandle);
		stream.emit(OpCode::callvirt(set_handle));
	}
}
