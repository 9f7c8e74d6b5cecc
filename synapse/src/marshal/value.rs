use crate::il::{CodeStreams, OpCode, StreamId};
use crate::marshal::home::Home;
use crate::marshal::kind::MarshallerKind;
use crate::marshal::marshaller::Marshaller;
use crate::types::PrimitiveType;

impl<'l> Marshaller<'l> {
	/// Fast path: no conversion. By-value arguments go straight to the call
	/// site; by-ref arguments are pinned and passed as a native integer.
	pub(crate) fn emit_blittable_value_argument_forward(&mut self, s: &mut CodeStreams<'l>) {
		if self.is_native_by_ref {
			let intptr = self.pool.get_primitive(PrimitiveType::IntPtr);
			let pinned = s.emitter.new_pinned_local(self.managed_param_type);
			let native = s.emitter.new_local(intptr);
			self.native_home = Some(Home::Local { slot: native, ty: intptr });
			{
				let (stream, _) = s.stream(StreamId::Marshalling);
				stream.emit(OpCode::ldarg(self.index - 1));
				stream.emit(OpCode::stloc(pinned));
				stream.emit(OpCode::ldloc(pinned));
				stream.emit(OpCode::conv_i);
				stream.emit(OpCode::stloc(native));
			}
			let (stream, _) = s.stream(StreamId::CallSiteSetup);
			stream.emit(OpCode::ldloc(native));
		} else {
			let (stream, _) = s.stream(StreamId::CallSiteSetup);
			stream.emit(OpCode::ldarg(self.index - 1));
		}
	}

	/// Reverse fast path. Without an out the incoming value (or pointer) is
	/// handed to the managed callee untouched.
	pub(crate) fn emit_blittable_value_argument_reverse(&mut self, s: &mut CodeStreams<'l>) {
		if !self.is_out {
			let (stream, _) = s.stream(StreamId::CallSiteSetup);
			stream.emit(OpCode::ldarg(self.index - 1));
			return;
		}
		self.emit_default_argument_reverse(s);
	}

	/// Normalises a managed bool to the native boolean width: `(x == 0) == 0`.
	pub(crate) fn emit_boolean_transform_forward(&mut self, s: &mut CodeStreams<'l>, target: StreamId) {
		let (stream, emitter) = s.stream(target);
		self.managed_home.unwrap().load_value(stream, emitter);
		stream.emit(OpCode::ldc_i4(0));
		stream.emit(OpCode::ceq);
		stream.emit(OpCode::ldc_i4(0));
		stream.emit(OpCode::ceq);
		if self.kind == MarshallerKind::CBool {
			stream.emit(OpCode::conv_u1);
		}
		self.native_home.unwrap().store_value(stream, emitter);
	}

	pub(crate) fn emit_boolean_transform_reverse(&mut self, s: &mut CodeStreams<'l>, target: StreamId) {
		let (stream, emitter) = s.stream(target);
		self.native_home.unwrap().load_value(stream, emitter);
		stream.emit(OpCode::ldc_i4(0));
		stream.emit(OpCode::ceq);
		stream.emit(OpCode::ldc_i4(0));
		stream.emit(OpCode::ceq);
		self.managed_home.unwrap().store_value(stream, emitter);
	}

	/// `LPStruct`: the callee receives a pointer to the caller's value. Value
	/// types live in the stub frame, so their address is stable without a pin.
	pub(crate) fn emit_blittable_struct_ptr_forward(&mut self, s: &mut CodeStreams<'l>, target: StreamId) {
		let (stream, emitter) = s.stream(target);
		self.managed_home.unwrap().load_address(stream, emitter);
		stream.emit(OpCode::conv_i);
		self.native_home.unwrap().store_value(stream, emitter);
	}
}
