use crate::il::{CodeStreams, InstructionStream, OpCode, StreamId, StubEmitter};
use crate::marshal::Direction;
use crate::marshal::home::Home;
use crate::marshal::marshaller::Marshaller;
use crate::tokens::HelperMethod;
use crate::types::{PrimitiveType, Type};

impl<'l> Marshaller<'l> {
	/// Pins the first element of `array_home` and stores its address into the
	/// native home; a null or empty array stores a null pointer instead. The
	/// pin lasts for the whole stub frame, so the native side may write into
	/// the managed storage until the call returns.
	///
	/// Shared by blittable arrays, ANSI transcode buffers and string-builder
	/// buffers.
	pub(crate) fn emit_pin_first_element(
		&mut self,
		s: &mut CodeStreams<'l>,
		target: StreamId,
		array_home: Home<'l>,
		element: &'l Type<'l>,
	) {
		let pinned = s.emitter.new_pinned_local(self.pool.get_by_ref(element));
		let null_case = s.emitter.new_label();
		let done = s.emitter.new_label();
		let (stream, emitter) = s.stream(target);
		array_home.load_value(stream, emitter);
		stream.emit(OpCode::brfalse(null_case));
		array_home.load_value(stream, emitter);
		stream.emit(OpCode::ldlen);
		stream.emit(OpCode::brfalse(null_case));
		array_home.load_value(stream, emitter);
		stream.emit(OpCode::ldc_i4(0));
		let token = emitter.type_token(element);
		stream.emit(OpCode::ldelema(token));
		stream.emit(OpCode::stloc(pinned));
		stream.emit(OpCode::ldloc(pinned));
		stream.emit(OpCode::conv_i);
		self.native_home.unwrap().store_value(stream, emitter);
		stream.emit(OpCode::br(done));
		stream.bind_label(null_case);
		stream.emit(OpCode::ldc_i4(0));
		stream.emit(OpCode::conv_i);
		self.native_home.unwrap().store_value(stream, emitter);
		stream.bind_label(done);
	}

	/// General arrays: allocate `count * sizeof(element)` zeroed unmanaged
	/// bytes, then convert the elements one by one through the element
	/// marshaller. A null managed array becomes a null native pointer and the
	/// body is skipped entirely.
	pub(crate) fn emit_array_alloc_and_copy_forward(&mut self, s: &mut CodeStreams<'l>, target: StreamId) {
		let int32 = self.pool.get_primitive(PrimitiveType::Int32);
		let element_managed = self.managed_type.element().unwrap();
		let element_native = self.native_type.element().unwrap();
		let count = s.emitter.new_local(int32);
		let index = s.emitter.new_local(int32);
		let null_case = s.emitter.new_label();
		let condition = s.emitter.new_label();
		let body = s.emitter.new_label();
		let done = s.emitter.new_label();
		let managed = self.managed_home.unwrap();
		{
			let (stream, emitter) = s.stream(target);
			managed.load_value(stream, emitter);
			stream.emit(OpCode::brfalse(null_case));
			managed.load_value(stream, emitter);
			stream.emit(OpCode::ldlen);
			stream.emit(OpCode::conv_i4);
			stream.emit(OpCode::stloc(count));
			stream.emit(OpCode::ldloc(count));
			let native_token = emitter.type_token(element_native);
			stream.emit(OpCode::sizeof(native_token));
			stream.emit(OpCode::mul);
			stream.emit(OpCode::conv_i);
			let alloc = emitter.helper_token(HelperMethod::CoTaskMemAllocAndZeroMemory);
			stream.emit(OpCode::call(alloc));
			self.native_home.unwrap().store_value(stream, emitter);
			stream.emit(OpCode::ldc_i4(0));
			stream.emit(OpCode::stloc(index));
			stream.emit(OpCode::br(condition));
			stream.bind_label(body);
			// slot address: native + index * sizeof(element)
			self.native_home.unwrap().load_value(stream, emitter);
			stream.emit(OpCode::ldloc(index));
			stream.emit(OpCode::sizeof(native_token));
			stream.emit(OpCode::mul);
			stream.emit(OpCode::add);
			managed.load_value(stream, emitter);
			stream.emit(OpCode::ldloc(index));
			let managed_token = emitter.type_token(element_managed);
			stream.emit(OpCode::ldelem(managed_token));
		}
		let mut element = self.element_marshaller(Direction::Forward);
		element.emit_element(s, target);
		{
			let (stream, emitter) = s.stream(target);
			let native_token = emitter.type_token(element_native);
			stream.emit(OpCode::stobj(native_token));
			stream.emit(OpCode::ldloc(index));
			stream.emit(OpCode::ldc_i4(1));
			stream.emit(OpCode::add);
			stream.emit(OpCode::stloc(index));
			stream.bind_label(condition);
			stream.emit(OpCode::ldloc(index));
			stream.emit(OpCode::ldloc(count));
			stream.emit(OpCode::blt(body));
			stream.emit(OpCode::br(done));
			stream.bind_label(null_case);
			stream.emit(OpCode::ldc_i4(0));
			stream.emit(OpCode::conv_i);
			self.native_home.unwrap().store_value(stream, emitter);
			stream.bind_label(done);
		}
	}

	/// Converts the native buffer back into the managed array.
	pub(crate) fn emit_array_copy_out(&mut self, s: &mut CodeStreams<'l>, target: StreamId) {
		let int32 = self.pool.get_primitive(PrimitiveType::Int32);
		let element_managed = self.managed_type.element().unwrap();
		let element_native = self.native_type.element().unwrap();
		let count = s.emitter.new_local(int32);
		let index = s.emitter.new_local(int32);
		let condition = s.emitter.new_label();
		let body = s.emitter.new_label();
		let done = s.emitter.new_label();
		let managed = self.managed_home.unwrap();
		{
			let (stream, emitter) = s.stream(target);
			managed.load_value(stream, emitter);
			stream.emit(OpCode::brfalse(done));
			self.emit_element_count_out(stream, emitter);
			stream.emit(OpCode::stloc(count));
			stream.emit(OpCode::ldc_i4(0));
			stream.emit(OpCode::stloc(index));
			stream.emit(OpCode::br(condition));
			stream.bind_label(body);
			managed.load_value(stream, emitter);
			stream.emit(OpCode::ldloc(index));
			self.native_home.unwrap().load_value(stream, emitter);
			stream.emit(OpCode::ldloc(index));
			let native_token = emitter.type_token(element_native);
			stream.emit(OpCode::sizeof(native_token));
			stream.emit(OpCode::mul);
			stream.emit(OpCode::add);
			stream.emit(OpCode::ldobj(native_token));
		}
		let mut element = self.element_marshaller(Direction::Reverse);
		element.emit_element(s, target);
		{
			let (stream, emitter) = s.stream(target);
			let managed_token = emitter.type_token(element_managed);
			stream.emit(OpCode::stelem(managed_token));
			stream.emit(OpCode::ldloc(index));
			stream.emit(OpCode::ldc_i4(1));
			stream.emit(OpCode::add);
			stream.emit(OpCode::stloc(index));
			stream.bind_label(condition);
			stream.emit(OpCode::ldloc(index));
			stream.emit(OpCode::ldloc(count));
			stream.emit(OpCode::blt(body));
			stream.bind_label(done);
		}
	}

	/// Materialises the managed array for an out-only by-ref parameter.
	pub(crate) fn emit_array_alloc_managed(&mut self, s: &mut CodeStreams<'l>) {
		let element_managed = self.managed_type.element().unwrap();
		let (stream, emitter) = s.stream(StreamId::Unmarshalling);
		self.emit_element_count_out(stream, emitter);
		let token = emitter.type_token(element_managed);
		stream.emit(OpCode::newarr(token));
		self.managed_home.unwrap().store_value(stream, emitter);
	}

	/// Element count on the way back: `sizeConst` plus the value of the
	/// parameter named by `sizeParamIndex`; either alone when only one is
	/// present, and 1 when neither is.
	pub(crate) fn emit_element_count_out(&mut self, stream: &mut InstructionStream, _emitter: &mut StubEmitter<'l>) {
		match (self.size_const, self.size_param) {
			(Some(size), Some(param)) => {
				stream.emit(OpCode::ldc_i4(size as i32));
				stream.emit(OpCode::ldarg(param));
				stream.emit(OpCode::conv_i4);
				stream.emit(OpCode::add);
			}
			(Some(size), None) => stream.emit(OpCode::ldc_i4(size as i32)),
			(None, Some(param)) => {
				stream.emit(OpCode::ldarg(param));
				stream.emit(OpCode::conv_i4);
			}
			(None, None) => stream.emit(OpCode::ldc_i4(1)),
		}
	}

	/// The allocation above is matched by an unconditional free;
	/// `CoTaskMemFree` accepts null.
	pub(crate) fn emit_array_cleanup(&mut self, s: &mut CodeStreams<'l>, target: StreamId) {
		let (stream, emitter) = s.stream(target);
		self.native_home.unwrap().load_value(stream, emitter);
		let free = emitter.helper_token(HelperMethod::CoTaskMemFree);
		stream.emit(OpCode::call(free));
	}
}
