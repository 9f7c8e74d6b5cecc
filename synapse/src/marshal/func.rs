use crate::il::{CodeStreams, OpCode, StreamId};
use crate::marshal::marshaller::Marshaller;
use crate::tokens::HelperMethod;

impl<'l> Marshaller<'l> {
	/// Delegates marshal as the stable native entry point of their reverse
	/// stub; the helper pins down the association for the delegate's lifetime.
	pub(crate) fn emit_function_pointer_transform(&mut self, s: &mut CodeStreams<'l>, target: StreamId) {
		let (stream, emitter) = s.stream(target);
		self.managed_home.unwrap().load_value(stream, emitter);
		let get_stub = emitter.helper_token(HelperMethod::GetStubForPInvokeDelegate);
		stream.emit(OpCode::call(get_stub));
		self.native_home.unwrap().store_value(stream, emitter);
	}
}
