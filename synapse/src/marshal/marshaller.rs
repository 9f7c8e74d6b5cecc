use derivative::Derivative;

use crate::descriptor::MethodPolicy;
use crate::il::{CodeStreams, OpCode, StreamId};
use crate::marshal::{Direction, MarshallerRole};
use crate::marshal::errors::MarshalError;
use crate::marshal::home::Home;
use crate::marshal::kind::{kind_for, MarshallerKind};
use crate::marshal::native::native_type_of;
use crate::marshal::stub::StubParameter;
use crate::types::{PrimitiveType, Type, TypeKind, TypePool};

/// The emitter family a kind dispatches to. Several kinds share one family:
/// everything bit-compatible funnels into the blittable fast path.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum Strategy {
	VoidReturn,
	BlittableValue,
	Boolean,
	BlittableStructPtr,
	UnicodeString,
	AnsiString,
	StringBuilder,
	Array,
	BlittableArray,
	SafeHandle,
	FunctionPointer,
}

/// One per parameter (plus one for the return value), alive for the duration
/// of a single stub emission.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Marshaller<'l> {
	#[derivative(Debug = "ignore")]
	pub(crate) pool: &'l TypePool<'l>,
	pub(crate) kind: MarshallerKind,
	pub(crate) element_kind: MarshallerKind,
	pub(crate) role: MarshallerRole,
	pub(crate) direction: Direction,
	/// 1-based parameter ordinal; 0 is the return value.
	pub(crate) index: u16,
	pub(crate) managed_type: &'l Type<'l>,
	pub(crate) managed_param_type: &'l Type<'l>,
	pub(crate) native_type: &'l Type<'l>,
	pub(crate) native_param_type: &'l Type<'l>,
	pub(crate) is_in: bool,
	pub(crate) is_out: bool,
	pub(crate) is_return: bool,
	pub(crate) is_optional: bool,
	pub(crate) is_managed_by_ref: bool,
	pub(crate) is_native_by_ref: bool,
	pub(crate) managed_home: Option<Home<'l>>,
	pub(crate) native_home: Option<Home<'l>>,
	pub(crate) size_const: Option<u32>,
	/// Argument slot of the parameter carrying the element count.
	pub(crate) size_param: Option<u16>,
}

impl<'l> Marshaller<'l> {
	pub fn new(
		pool: &'l TypePool<'l>,
		policy: &MethodPolicy,
		signature: &[StubParameter<'l>],
		param: &StubParameter<'l>,
		direction: Direction,
	) -> Result<Self, MarshalError> {
		let meta = &param.metadata;
		let index = meta.index;
		let is_return = meta.is_return();
		let managed_param_type = param.ty;
		let is_managed_by_ref = managed_param_type.is_by_ref();
		let managed_type = managed_param_type.unwrap_by_ref();

		let unsupported = || MarshalError::UnsupportedSignature { index, ty: managed_type.to_string() };

		let (kind, element_kind) = kind_for(
			managed_type,
			meta.native_tag(),
			meta.array_sub_tag(),
			policy,
			MarshallerRole::Argument,
			is_return,
		);
		if kind == MarshallerKind::Invalid || !kind.has_emitter() {
			#[cfg(feature = "tracing")]
			tracing::debug!(?kind, index, "no marshaller for signature element");
			return Err(unsupported());
		}
		if kind == MarshallerKind::VoidReturn && !is_return {
			return Err(unsupported());
		}

		// Effective in/out resolution. By-ref and by-value string builders
		// default to [In, Out], everything else to [In]; explicit attributes
		// win. A by-value value type or string can never observably be [Out].
		let string_builder = kind == MarshallerKind::UnicodeStringBuilder;
		let (mut is_in, mut is_out) = match (meta.is_in(), meta.is_out()) {
			(false, false) => match is_managed_by_ref || string_builder {
				true => (true, true),
				false => (true, false),
			},
			explicit => explicit,
		};
		if is_return {
			(is_in, is_out) = (false, false);
		}
		let string = matches!(kind, MarshallerKind::UnicodeString | MarshallerKind::AnsiString);
		if !is_managed_by_ref && (managed_type.is_value_type() || string) {
			is_out = false;
		}

		Self::check_direction_support(kind, direction, is_return, is_managed_by_ref, is_in, is_out)
			.map_err(|_| unsupported())?;

		let (mut size_const, mut size_param) = (None, None);
		if matches!(kind, MarshallerKind::Array | MarshallerKind::BlittableArray) {
			if kind == MarshallerKind::Array && !Self::element_supported(element_kind, direction, is_out) {
				return Err(unsupported());
			}
			if let Some(marshal_as) = &meta.marshal_as {
				size_const = marshal_as.size_const;
				if let Some(value) = marshal_as.size_param_index {
					// offset by one to skip the return-value slot
					let count_param = signature
						.get(value as usize + 1)
						.ok_or(MarshalError::InvalidSizeParamIndex { index, value })?;
					if !count_param.ty.is_integral() {
						return Err(MarshalError::InvalidSizeParamIndex { index, value });
					}
					size_param = Some(value);
				}
			}
		}

		let is_native_by_ref = is_managed_by_ref;
		let native_type = native_type_of(pool, kind, element_kind, managed_type, meta.native_tag(), meta.array_sub_tag())
			.ok_or_else(unsupported)?;
		let native_param_type = match is_native_by_ref {
			true => pool.get_pointer(native_type),
			false => native_type,
		};

		Ok(Self {
			pool,
			kind,
			element_kind,
			role: MarshallerRole::Argument,
			direction,
			index,
			managed_type,
			managed_param_type,
			native_type,
			native_param_type,
			is_in,
			is_out,
			is_return,
			is_optional: meta.is_optional(),
			is_managed_by_ref,
			is_native_by_ref,
			managed_home: None,
			native_home: None,
			size_const,
			size_param,
		})
	}

	/// Combinations the emitter families do not cover.
	fn check_direction_support(
		kind: MarshallerKind,
		direction: Direction,
		is_return: bool,
		by_ref: bool,
		is_in: bool,
		is_out: bool,
	) -> Result<(), ()> {
		use crate::marshal::kind::MarshallerKind as K;
		match kind {
			K::SafeHandle => {
				// the source asserts against [In, Out] by-ref handles; by-ref
				// handles are only meaningful as pure outputs
				if by_ref && !(is_out && !is_in) {
					return Err(());
				}
				if direction == Direction::Reverse && (is_return || by_ref || is_out) {
					return Err(());
				}
			}
			K::FunctionPointer => {
				if direction == Direction::Reverse || is_return || by_ref || is_out {
					return Err(());
				}
			}
			K::BlittableStructPtr if by_ref => return Err(()),
			_ if direction == Direction::Reverse => {
				let reversible = matches!(
					kind,
					K::VoidReturn | K::BlittableValue | K::Enum | K::BlittableStruct | K::UnicodeChar | K::Bool | K::CBool
				);
				let in_only_reference = matches!(kind, K::UnicodeString | K::AnsiString) && !is_return && !by_ref && !is_out;
				if !reversible && !in_only_reference {
					return Err(());
				}
			}
			_ => {}
		}
		Ok(())
	}

	/// Element kinds the general array loop can drive. The promoted blittable
	/// element kinds never reach it; reference-typed elements would need
	/// per-element pins and are rejected.
	fn element_supported(element_kind: MarshallerKind, direction: Direction, is_out: bool) -> bool {
		use crate::marshal::kind::MarshallerKind as K;
		match element_kind {
			K::Bool | K::CBool | K::BlittableStruct => true,
			K::FunctionPointer => direction == Direction::Forward && !is_out,
			_ => false,
		}
	}

	pub(crate) fn strategy(&self) -> Strategy {
		use crate::marshal::kind::MarshallerKind as K;
		match self.kind {
			K::VoidReturn => Strategy::VoidReturn,
			K::BlittableValue | K::Enum | K::BlittableStruct | K::UnicodeChar => Strategy::BlittableValue,
			K::Bool | K::CBool => Strategy::Boolean,
			K::BlittableStructPtr => Strategy::BlittableStructPtr,
			K::UnicodeString => Strategy::UnicodeString,
			K::AnsiString => Strategy::AnsiString,
			K::UnicodeStringBuilder => Strategy::StringBuilder,
			K::Array => Strategy::Array,
			K::BlittableArray => Strategy::BlittableArray,
			K::SafeHandle => Strategy::SafeHandle,
			K::FunctionPointer => Strategy::FunctionPointer,
			_ => unreachable!("kind without an emitter survived construction"),
		}
	}

	#[inline]
	pub fn kind(&self) -> MarshallerKind {
		self.kind
	}

	#[inline]
	pub fn role(&self) -> MarshallerRole {
		self.role
	}

	#[inline]
	pub fn direction(&self) -> Direction {
		self.direction
	}

	#[inline]
	pub fn index(&self) -> u16 {
		self.index
	}

	#[inline]
	pub fn is_optional(&self) -> bool {
		self.is_optional
	}

	#[inline]
	pub fn managed_type(&self) -> &'l Type<'l> {
		self.managed_type
	}

	#[inline]
	pub fn native_type(&self) -> &'l Type<'l> {
		self.native_type
	}

	#[inline]
	pub fn native_param_type(&self) -> &'l Type<'l> {
		self.native_param_type
	}

	/// The direction-appropriate emission entry point.
	pub fn emit_marshalling(&mut self, s: &mut CodeStreams<'l>) {
		match (self.direction, self.is_return) {
			(Direction::Forward, true) => self.emit_marshal_return_value_managed_to_native(s),
			(Direction::Forward, false) => self.emit_marshal_argument_managed_to_native(s),
			(Direction::Reverse, true) => self.emit_marshal_return_value_native_to_managed(s),
			(Direction::Reverse, false) => self.emit_marshal_argument_native_to_managed(s),
		}
	}

	fn emit_marshal_argument_managed_to_native(&mut self, s: &mut CodeStreams<'l>) {
		match self.strategy() {
			Strategy::BlittableValue => return self.emit_blittable_value_argument_forward(s),
			Strategy::SafeHandle => return self.emit_safe_handle_argument_forward(s),
			_ => {}
		}

		self.setup_argument_homes_forward(s);
		if self.is_managed_by_ref && self.is_in {
			// dereference the caller's slot into the working local
			let (stream, emitter) = s.stream(StreamId::Marshalling);
			Home::ByRefArg { index: self.index - 1, ty: self.managed_type }.load_value(stream, emitter);
			self.managed_home.unwrap().store_value(stream, emitter);
		}
		if self.is_managed_by_ref && !self.is_in {
			self.re_init_native_transform(s);
		} else {
			self.alloc_and_transform_managed_to_native(s);
		}
		self.load_native_argument(s);
		if self.is_out {
			if self.is_in {
				self.clear_managed_transform(s);
			}
			if self.is_managed_by_ref && !self.is_in {
				self.alloc_native_to_managed(s);
			}
			self.transform_native_to_managed(s, StreamId::Unmarshalling);
			if self.is_managed_by_ref {
				// write-back: address first, then the converted value
				let (stream, emitter) = s.stream(StreamId::Unmarshalling);
				stream.emit(OpCode::ldarg(self.index - 1));
				self.managed_home.unwrap().load_value(stream, emitter);
				let token = emitter.type_token(self.managed_type);
				stream.emit(OpCode::stobj(token));
			}
		}
		self.emit_cleanup(s, StreamId::Cleanup);
	}

	fn emit_marshal_argument_native_to_managed(&mut self, s: &mut CodeStreams<'l>) {
		if self.strategy() == Strategy::BlittableValue {
			return self.emit_blittable_value_argument_reverse(s);
		}
		self.emit_default_argument_reverse(s);
	}

	pub(crate) fn emit_default_argument_reverse(&mut self, s: &mut CodeStreams<'l>) {
		self.setup_argument_homes_reverse(s);
		if self.is_native_by_ref && self.is_in {
			let (stream, emitter) = s.stream(StreamId::Marshalling);
			Home::ByRefArg { index: self.index - 1, ty: self.native_type }.load_value(stream, emitter);
			self.native_home.unwrap().store_value(stream, emitter);
		}
		if !(self.is_native_by_ref && !self.is_in) {
			self.transform_native_to_managed(s, StreamId::Marshalling);
		}
		self.load_managed_argument(s);
		if self.is_out {
			self.transform_managed_to_native(s, StreamId::Unmarshalling);
			if self.is_native_by_ref {
				let (stream, emitter) = s.stream(StreamId::Unmarshalling);
				stream.emit(OpCode::ldarg(self.index - 1));
				self.native_home.unwrap().load_value(stream, emitter);
				let token = emitter.type_token(self.native_type);
				stream.emit(OpCode::stobj(token));
			}
		}
		self.emit_cleanup(s, StreamId::Cleanup);
	}

	/// The native call result is on the stack when the return-value stream
	/// begins; the converted managed value must be on the stack when it ends.
	fn emit_marshal_return_value_managed_to_native(&mut self, s: &mut CodeStreams<'l>) {
		match self.strategy() {
			// nothing to do: no value, or the value flows through untouched
			Strategy::VoidReturn | Strategy::BlittableValue => return,
			_ => {}
		}
		self.setup_return_homes(s);
		{
			let (stream, emitter) = s.stream(StreamId::ReturnValue);
			self.native_home.unwrap().store_value(stream, emitter);
		}
		self.transform_native_to_managed(s, StreamId::ReturnValue);
		self.emit_cleanup(s, StreamId::ReturnValue);
		let (stream, emitter) = s.stream(StreamId::ReturnValue);
		self.managed_home.unwrap().load_value(stream, emitter);
	}

	fn emit_marshal_return_value_native_to_managed(&mut self, s: &mut CodeStreams<'l>) {
		match self.strategy() {
			Strategy::VoidReturn | Strategy::BlittableValue => return,
			_ => {}
		}
		self.setup_return_homes(s);
		{
			let (stream, emitter) = s.stream(StreamId::ReturnValue);
			self.managed_home.unwrap().store_value(stream, emitter);
		}
		self.transform_managed_to_native(s, StreamId::ReturnValue);
		let (stream, emitter) = s.stream(StreamId::ReturnValue);
		self.native_home.unwrap().load_value(stream, emitter);
	}

	/// Element conversion operates on the evaluation stack: the incoming
	/// value is consumed and the converted one left behind for the caller to
	/// store into the array slot.
	pub(crate) fn emit_element(&mut self, s: &mut CodeStreams<'l>, target: StreamId) {
		debug_assert!(self.role == MarshallerRole::Element);
		let managed = s.emitter.new_local(self.managed_type);
		let native = s.emitter.new_local(self.native_type);
		self.managed_home = Some(Home::Local { slot: managed, ty: self.managed_type });
		self.native_home = Some(Home::Local { slot: native, ty: self.native_type });
		match self.direction {
			Direction::Forward => {
				{
					let (stream, emitter) = s.stream(target);
					self.managed_home.unwrap().store_value(stream, emitter);
				}
				self.transform_managed_to_native(s, target);
				let (stream, emitter) = s.stream(target);
				self.native_home.unwrap().load_value(stream, emitter);
			}
			Direction::Reverse => {
				{
					let (stream, emitter) = s.stream(target);
					self.native_home.unwrap().store_value(stream, emitter);
				}
				self.transform_native_to_managed(s, target);
				let (stream, emitter) = s.stream(target);
				self.managed_home.unwrap().load_value(stream, emitter);
			}
		}
	}

	pub(crate) fn element_marshaller(&self, direction: Direction) -> Marshaller<'l> {
		debug_assert!(self.element_kind != MarshallerKind::Invalid && self.element_kind != MarshallerKind::Unknown);
		let managed = self.managed_type.element().unwrap();
		let native = self.native_type.element().unwrap();
		Marshaller {
			pool: self.pool,
			kind: self.element_kind,
			element_kind: MarshallerKind::Invalid,
			role: MarshallerRole::Element,
			direction,
			index: self.index,
			managed_type: managed,
			managed_param_type: managed,
			native_type: native,
			native_param_type: native,
			is_in: true,
			is_out: false,
			is_return: false,
			is_optional: false,
			is_managed_by_ref: false,
			is_native_by_ref: false,
			managed_home: None,
			native_home: None,
			size_const: None,
			size_param: None,
		}
	}

	fn setup_argument_homes_forward(&mut self, s: &mut CodeStreams<'l>) {
		self.managed_home = Some(match self.is_managed_by_ref {
			true => Home::Local { slot: s.emitter.new_local(self.managed_type), ty: self.managed_type },
			false => Home::Arg { index: self.index - 1, ty: self.managed_type },
		});
		self.native_home = Some(Home::Local { slot: s.emitter.new_local(self.native_type), ty: self.native_type });
	}

	fn setup_argument_homes_reverse(&mut self, s: &mut CodeStreams<'l>) {
		self.native_home = Some(match self.is_native_by_ref {
			true => Home::Local { slot: s.emitter.new_local(self.native_type), ty: self.native_type },
			false => Home::Arg { index: self.index - 1, ty: self.native_param_type },
		});
		self.managed_home = Some(Home::Local { slot: s.emitter.new_local(self.managed_type), ty: self.managed_type });
	}

	fn setup_return_homes(&mut self, s: &mut CodeStreams<'l>) {
		self.managed_home = Some(Home::Local { slot: s.emitter.new_local(self.managed_type), ty: self.managed_type });
		self.native_home = Some(Home::Local { slot: s.emitter.new_local(self.native_type), ty: self.native_type });
	}

	/// Pushes the native argument for the call site: its address when the
	/// native side expects a pointer, its value otherwise.
	fn load_native_argument(&mut self, s: &mut CodeStreams<'l>) {
		let (stream, emitter) = s.stream(StreamId::CallSiteSetup);
		match self.is_native_by_ref {
			true => self.native_home.unwrap().load_address(stream, emitter),
			false => self.native_home.unwrap().load_value(stream, emitter),
		}
	}

	fn load_managed_argument(&mut self, s: &mut CodeStreams<'l>) {
		let (stream, emitter) = s.stream(StreamId::CallSiteSetup);
		match self.is_managed_by_ref {
			true => self.managed_home.unwrap().load_address(stream, emitter),
			false => self.managed_home.unwrap().load_value(stream, emitter),
		}
	}

	fn alloc_and_transform_managed_to_native(&mut self, s: &mut CodeStreams<'l>) {
		self.transform_managed_to_native(s, StreamId::Marshalling);
	}

	pub(crate) fn transform_managed_to_native(&mut self, s: &mut CodeStreams<'l>, target: StreamId) {
		match self.strategy() {
			Strategy::Boolean => self.emit_boolean_transform_forward(s, target),
			Strategy::BlittableStructPtr => self.emit_blittable_struct_ptr_forward(s, target),
			Strategy::UnicodeString => self.emit_unicode_string_pin(s, target),
			Strategy::AnsiString => self.emit_ansi_string_transcode(s, target),
			Strategy::StringBuilder => self.emit_string_builder_buffer(s, target),
			Strategy::Array => self.emit_array_alloc_and_copy_forward(s, target),
			Strategy::BlittableArray => {
				let element = self.managed_type.element().unwrap();
				let array_home = self.managed_home.unwrap();
				self.emit_pin_first_element(s, target, array_home, element);
			}
			Strategy::FunctionPointer => self.emit_function_pointer_transform(s, target),
			Strategy::SafeHandle | Strategy::VoidReturn => {
				unreachable!("kind marshals through a dedicated protocol")
			}
			Strategy::BlittableValue => {
				let (stream, emitter) = s.stream(target);
				self.managed_home.unwrap().load_value(stream, emitter);
				self.native_home.unwrap().store_value(stream, emitter);
			}
		}
	}

	pub(crate) fn transform_native_to_managed(&mut self, s: &mut CodeStreams<'l>, target: StreamId) {
		match self.strategy() {
			Strategy::Boolean => self.emit_boolean_transform_reverse(s, target),
			Strategy::UnicodeString => self.emit_unicode_string_materialize(s, target),
			Strategy::AnsiString => self.emit_ansi_string_materialize(s, target),
			Strategy::StringBuilder => self.emit_string_builder_replace(s, target),
			Strategy::Array => self.emit_array_copy_out(s, target),
			Strategy::BlittableArray => {
				// data was written in place through the pin unless the callee
				// handed back a fresh buffer
				if self.is_managed_by_ref && !self.is_in {
					self.emit_array_copy_out(s, target);
				}
			}
			Strategy::SafeHandle => self.emit_safe_handle_materialize(s, target),
			Strategy::FunctionPointer | Strategy::BlittableStructPtr | Strategy::VoidReturn => {
				unreachable!("kind has no native-to-managed transform")
			}
			Strategy::BlittableValue => {
				let (stream, emitter) = s.stream(target);
				self.native_home.unwrap().load_value(stream, emitter);
				self.managed_home.unwrap().store_value(stream, emitter);
			}
		}
	}

	/// Zeroes the native home before an out-only call.
	fn re_init_native_transform(&mut self, s: &mut CodeStreams<'l>) {
		let native = self.native_home.unwrap();
		let (stream, emitter) = s.stream(StreamId::Marshalling);
		match native.ty().kind() {
			TypeKind::Pointer => {
				stream.emit(OpCode::ldc_i4(0));
				stream.emit(OpCode::conv_i);
				native.store_value(stream, emitter);
			}
			TypeKind::Primitive => {
				stream.emit(OpCode::ldc_i4(0));
				match native.ty().primitive().unwrap() {
					PrimitiveType::Int64 | PrimitiveType::UInt64 => stream.emit(OpCode::conv_i8),
					PrimitiveType::IntPtr | PrimitiveType::UIntPtr => stream.emit(OpCode::conv_i),
					_ => {}
				}
				native.store_value(stream, emitter);
			}
			_ => {
				native.load_address(stream, emitter);
				let token = emitter.type_token(native.ty());
				stream.emit(OpCode::initobj(token));
			}
		}
	}

	/// Resets managed state before unmarshalling an `[In, Out]` value. No
	/// current family needs it; the protocol point exists for variants that
	/// reuse a managed container across the call.
	fn clear_managed_transform(&mut self, _s: &mut CodeStreams<'l>) {}

	/// Materialises the managed container for an out-only by-ref before the
	/// native-to-managed transform runs.
	fn alloc_native_to_managed(&mut self, s: &mut CodeStreams<'l>) {
		match self.strategy() {
			Strategy::Array | Strategy::BlittableArray => self.emit_array_alloc_managed(s),
			_ => {}
		}
	}

	fn emit_cleanup(&mut self, s: &mut CodeStreams<'l>, target: StreamId) {
		match self.strategy() {
			Strategy::Array => self.emit_array_cleanup(s, target),
			Strategy::BlittableArray if self.is_managed_by_ref && !self.is_in => {
				self.emit_array_cleanup(s, target)
			}
			_ => {}
		}
	}
}
