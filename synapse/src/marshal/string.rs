use crate::il::{CodeStreams, OpCode, StreamId};
use crate::marshal::home::Home;
use crate::marshal::marshaller::Marshaller;
use crate::tokens::HelperMethod;
use crate::types::PrimitiveType;

impl<'l> Marshaller<'l> {
	/// Pins the managed string and derives a `char*` by adding the constant
	/// string-data offset. A null source branches over the offset add so the
	/// native side sees a null pointer.
	pub(crate) fn emit_unicode_string_pin(&mut self, s: &mut CodeStreams<'l>, target: StreamId) {
		let pinned = s.emitter.new_pinned_local(self.managed_type);
		let done = s.emitter.new_label();
		let (stream, emitter) = s.stream(target);
		self.managed_home.unwrap().load_value(stream, emitter);
		stream.emit(OpCode::stloc(pinned));
		stream.emit(OpCode::ldloc(pinned));
		stream.emit(OpCode::conv_i);
		stream.emit(OpCode::dup);
		stream.emit(OpCode::brfalse(done));
		let offset = emitter.helper_token(HelperMethod::OffsetToStringData);
		stream.emit(OpCode::call(offset));
		stream.emit(OpCode::add);
		stream.bind_label(done);
		self.native_home.unwrap().store_value(stream, emitter);
	}

	/// Builds a managed string back from a `char*`.
	pub(crate) fn emit_unicode_string_materialize(&mut self, s: &mut CodeStreams<'l>, target: StreamId) {
		let (stream, emitter) = s.stream(target);
		self.native_home.unwrap().load_value(stream, emitter);
		let ctor = emitter.helper_token(HelperMethod::StringCtorCharPtr);
		stream.emit(OpCode::newobj(ctor));
		self.managed_home.unwrap().store_value(stream, emitter);
	}

	/// Transcodes to a managed byte buffer, then pins it like a blittable
	/// array. No unmanaged allocation takes place, so there is no cleanup.
	pub(crate) fn emit_ansi_string_transcode(&mut self, s: &mut CodeStreams<'l>, target: StreamId) {
		let byte = self.pool.get_primitive(PrimitiveType::UInt8);
		let byte_array = self.pool.get_array(byte);
		let buffer = s.emitter.new_local(byte_array);
		{
			let (stream, emitter) = s.stream(target);
			self.managed_home.unwrap().load_value(stream, emitter);
			let transcode = emitter.helper_token(HelperMethod::StringToAnsi);
			stream.emit(OpCode::call(transcode));
			stream.emit(OpCode::stloc(buffer));
		}
		self.emit_pin_first_element(s, target, Home::Local { slot: buffer, ty: byte_array }, byte);
	}

	pub(crate) fn emit_ansi_string_materialize(&mut self, s: &mut CodeStreams<'l>, target: StreamId) {
		let (stream, emitter) = s.stream(target);
		self.native_home.unwrap().load_value(stream, emitter);
		let decode = emitter.helper_token(HelperMethod::AnsiStringToString);
		stream.emit(OpCode::call(decode));
		self.managed_home.unwrap().store_value(stream, emitter);
	}

	/// Borrows the builder's empty buffer and pins it; the native side writes
	/// straight into the builder's storage.
	pub(crate) fn emit_string_builder_buffer(&mut self, s: &mut CodeStreams<'l>, target: StreamId) {
		let char_ = self.pool.get_primitive(PrimitiveType::Char);
		let char_array = self.pool.get_array(char_);
		let buffer = s.emitter.new_local(char_array);
		{
			let (stream, emitter) = s.stream(target);
			self.managed_home.unwrap().load_value(stream, emitter);
			let borrow = emitter.helper_token(HelperMethod::GetEmptyStringBuilderBuffer);
			stream.emit(OpCode::call(borrow));
			stream.emit(OpCode::stloc(buffer));
		}
		self.emit_pin_first_element(s, target, Home::Local { slot: buffer, ty: char_array }, char_);
	}

	pub(crate) fn emit_string_builder_replace(&mut self, s: &mut CodeStreams<'l>, target: StreamId) {
		let (stream, emitter) = s.stream(target);
		self.managed_home.unwrap().load_value(stream, emitter);
		self.native_home.unwrap().load_value(stream, emitter);
		let replace = emitter.helper_token(HelperMethod::StringBuilderReplaceBuffer);
		stream.emit(OpCode::callvirt(replace));
	}
}
