use crate::descriptor::{MarshalAsDescriptor, MethodPolicy, ParamAttributes, ParameterMetadata};
use crate::il::{CodeStreams, LocalDef, OpCode};
use crate::marshal::Direction;
use crate::marshal::errors::MarshalError;
use crate::marshal::marshaller::Marshaller;
use crate::tokens::TokenResolver;
use crate::types::{Type, TypePool};

/// One slot of a method signature: the managed type plus its interop
/// metadata. Slot 0 is the return value.
#[derive(Debug)]
pub struct StubParameter<'l> {
	pub ty: &'l Type<'l>,
	pub metadata: ParameterMetadata,
}

#[derive(Debug)]
pub struct MethodSignature<'l> {
	policy: MethodPolicy,
	parameters: Vec<StubParameter<'l>>,
}

impl<'l> MethodSignature<'l> {
	pub fn new(policy: MethodPolicy, return_type: &'l Type<'l>, return_marshal_as: Option<MarshalAsDescriptor>) -> Self {
		Self {
			policy,
			parameters: vec![StubParameter {
				ty: return_type,
				metadata: ParameterMetadata::new(0, ParamAttributes::empty(), return_marshal_as),
			}],
		}
	}

	pub fn add_parameter(
		&mut self,
		ty: &'l Type<'l>,
		attributes: ParamAttributes,
		marshal_as: Option<MarshalAsDescriptor>,
	) -> &mut Self {
		let index = self.parameters.len() as u16;
		self.parameters.push(StubParameter {
			ty,
			metadata: ParameterMetadata::new(index, attributes, marshal_as),
		});
		self
	}

	#[inline]
	pub fn policy(&self) -> &MethodPolicy {
		&self.policy
	}

	#[inline]
	pub fn parameters(&self) -> &[StubParameter<'l>] {
		&self.parameters
	}
}

/// Builds the marshalling streams for one stub: one marshaller per
/// parameter, each driven through its direction-appropriate entry point.
/// Parameters see each other through the shared signature slice, which is
/// how `SizeParamIndex` resolves across siblings.
#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
pub fn generate_stub<'l>(
	pool: &'l TypePool<'l>,
	signature: &MethodSignature<'l>,
	direction: Direction,
	resolver: Box<dyn TokenResolver>,
) -> Result<MarshallingStub<'l>, MarshalError> {
	let mut marshallers = Vec::with_capacity(signature.parameters.len());
	for param in &signature.parameters {
		marshallers.push(Marshaller::new(pool, &signature.policy, &signature.parameters, param, direction)?);
	}

	let mut streams = CodeStreams::new(resolver);
	let (return_value, arguments) = marshallers.split_first_mut().unwrap();
	for marshaller in arguments {
		marshaller.emit_marshalling(&mut streams);
	}
	// the return marshaller runs last and only touches the return-value stream
	return_value.emit_marshalling(&mut streams);

	Ok(MarshallingStub { streams })
}

/// The populated stream bundle of one generated stub. The back-end inserts
/// the native call between the call-site-setup and unmarshalling streams and
/// lowers the cleanup stream into its guaranteed-execution construct.
#[derive(Debug)]
pub struct MarshallingStub<'l> {
	streams: CodeStreams<'l>,
}

impl<'l> MarshallingStub<'l> {
	#[inline]
	pub fn streams(&self) -> &CodeStreams<'l> {
		&self.streams
	}

	#[inline]
	pub fn locals(&self) -> &[LocalDef<'l>] {
		self.streams.emitter.locals()
	}

	pub fn assemble(&self) -> Vec<OpCode> {
		self.streams.assemble()
	}
}

#[cfg(test)]
mod tests {
	use bumpalo::Bump;

	use crate::descriptor::{CharSet, NativeTypeTag};
	use crate::types::PrimitiveType;

	use super::*;

	fn marshaller<'l>(
		pool: &'l TypePool<'l>,
		signature: &MethodSignature<'l>,
		index: usize,
		direction: Direction,
	) -> Result<Marshaller<'l>, MarshalError> {
		Marshaller::new(pool, signature.policy(), signature.parameters(), &signature.parameters()[index], direction)
	}

	#[test]
	fn by_ref_defaults_to_in_out() {
		let bump = Bump::new();
		let pool: &TypePool = bump.alloc(TypePool::new(&bump));
		let int32 = pool.get_primitive(PrimitiveType::Int32);
		let void = pool.get_primitive(PrimitiveType::Void);
		let mut sig = MethodSignature::new(MethodPolicy::default(), void, None);
		sig.add_parameter(pool.get_by_ref(int32), ParamAttributes::empty(), None);
		let m = marshaller(pool, &sig, 1, Direction::Forward).unwrap();
		assert!(m.is_in && m.is_out);
		assert!(m.is_managed_by_ref && m.is_native_by_ref);
		assert_eq!(m.native_param_type(), pool.get_pointer(int32));
	}

	#[test]
	fn by_value_strings_never_marshal_out() {
		let bump = Bump::new();
		let pool: &TypePool = bump.alloc(TypePool::new(&bump));
		let void = pool.get_primitive(PrimitiveType::Void);
		let string = pool.known().string;
		let mut sig = MethodSignature::new(MethodPolicy::default(), void, None);
		sig.add_parameter(string, ParamAttributes::IN | ParamAttributes::OUT, None);
		let m = marshaller(pool, &sig, 1, Direction::Forward).unwrap();
		assert!(m.is_in);
		assert!(!m.is_out);
	}

	#[test]
	fn by_value_value_types_drop_out() {
		let bump = Bump::new();
		let pool: &TypePool = bump.alloc(TypePool::new(&bump));
		let int32 = pool.get_primitive(PrimitiveType::Int32);
		let void = pool.get_primitive(PrimitiveType::Void);
		let mut sig = MethodSignature::new(MethodPolicy::default(), void, None);
		sig.add_parameter(int32, ParamAttributes::OUT, None);
		let m = marshaller(pool, &sig, 1, Direction::Forward).unwrap();
		assert!(!m.is_out);
	}

	#[test]
	fn string_builders_default_to_in_out() {
		let bump = Bump::new();
		let pool: &TypePool = bump.alloc(TypePool::new(&bump));
		let void = pool.get_primitive(PrimitiveType::Void);
		let builder = pool.known().string_builder;
		let mut sig = MethodSignature::new(MethodPolicy::default(), void, None);
		sig.add_parameter(builder, ParamAttributes::empty(), None);
		let m = marshaller(pool, &sig, 1, Direction::Forward).unwrap();
		assert!(m.is_in && m.is_out);
	}

	#[test]
	fn in_out_by_ref_safe_handles_are_rejected() {
		let bump = Bump::new();
		let pool: &TypePool = bump.alloc(TypePool::new(&bump));
		let void = pool.get_primitive(PrimitiveType::Void);
		let handle = pool.define_handle("Demo", "FileHandle");
		let mut sig = MethodSignature::new(MethodPolicy::default(), void, None);
		sig.add_parameter(pool.get_by_ref(handle), ParamAttributes::IN | ParamAttributes::OUT, None);
		assert!(marshaller(pool, &sig, 1, Direction::Forward).is_err());

		let mut sig = MethodSignature::new(MethodPolicy::default(), void, None);
		sig.add_parameter(pool.get_by_ref(handle), ParamAttributes::OUT, None);
		assert!(marshaller(pool, &sig, 1, Direction::Forward).is_ok());
	}

	#[test]
	fn unsupported_kinds_are_rejected_with_the_parameter_index() {
		let bump = Bump::new();
		let pool: &TypePool = bump.alloc(TypePool::new(&bump));
		let void = pool.get_primitive(PrimitiveType::Void);
		let mut sig = MethodSignature::new(MethodPolicy::default(), void, None);
		sig.add_parameter(pool.known().date_time, ParamAttributes::empty(), None);
		match marshaller(pool, &sig, 1, Direction::Forward) {
			Err(MarshalError::UnsupportedSignature { index: 1, ty }) => assert_eq!(ty, "System.DateTime"),
			other => panic!("expected rejection, got {other:?}"),
		}
	}

	#[test]
	fn ansi_chars_have_no_emitter() {
		let bump = Bump::new();
		let pool: &TypePool = bump.alloc(TypePool::new(&bump));
		let void = pool.get_primitive(PrimitiveType::Void);
		let char_ = pool.get_primitive(PrimitiveType::Char);
		let mut sig = MethodSignature::new(MethodPolicy::with_char_set(CharSet::Ansi), void, None);
		sig.add_parameter(char_, ParamAttributes::empty(), None);
		assert!(marshaller(pool, &sig, 1, Direction::Forward).is_err());
	}

	#[test]
	fn size_param_index_must_name_an_integral_parameter() {
		let bump = Bump::new();
		let pool: &TypePool = bump.alloc(TypePool::new(&bump));
		let void = pool.get_primitive(PrimitiveType::Void);
		let int_array = pool.get_array(pool.get_primitive(PrimitiveType::Int32));
		let mut descriptor = MarshalAsDescriptor::new(NativeTypeTag::Array);
		descriptor.size_param_index = Some(1);

		// names the string parameter
		let mut sig = MethodSignature::new(MethodPolicy::default(), void, None);
		sig.add_parameter(int_array, ParamAttributes::empty(), Some(descriptor));
		sig.add_parameter(pool.known().string, ParamAttributes::empty(), None);
		match marshaller(pool, &sig, 1, Direction::Forward) {
			Err(MarshalError::InvalidSizeParamIndex { index: 1, value: 1 }) => {}
			other => panic!("expected rejection, got {other:?}"),
		}

		// out of range
		let mut sig = MethodSignature::new(MethodPolicy::default(), void, None);
		sig.add_parameter(int_array, ParamAttributes::empty(), Some(descriptor));
		assert!(matches!(
			marshaller(pool, &sig, 1, Direction::Forward),
			Err(MarshalError::InvalidSizeParamIndex { .. })
		));

		// names the int parameter
		let mut sig = MethodSignature::new(MethodPolicy::default(), void, None);
		sig.add_parameter(int_array, ParamAttributes::empty(), Some(descriptor));
		sig.add_parameter(pool.get_primitive(PrimitiveType::Int32), ParamAttributes::empty(), None);
		let m = marshaller(pool, &sig, 1, Direction::Forward).unwrap();
		assert_eq!(m.size_param, Some(1));
	}

	#[test]
	fn void_is_only_valid_as_a_return() {
		let bump = Bump::new();
		let pool: &TypePool = bump.alloc(TypePool::new(&bump));
		let void = pool.get_primitive(PrimitiveType::Void);
		let mut sig = MethodSignature::new(MethodPolicy::default(), void, None);
		sig.add_parameter(void, ParamAttributes::empty(), None);
		assert!(marshaller(pool, &sig, 1, Direction::Forward).is_err());
		assert!(marshaller(pool, &sig, 0, Direction::Forward).is_ok());
	}

	#[test]
	fn reverse_delegates_are_rejected() {
		let bump = Bump::new();
		let pool: &TypePool = bump.alloc(TypePool::new(&bump));
		let void = pool.get_primitive(PrimitiveType::Void);
		let callback = pool.define_delegate("Demo", "Callback");
		let mut sig = MethodSignature::new(MethodPolicy::default(), void, None);
		sig.add_parameter(callback, ParamAttributes::empty(), None);
		assert!(marshaller(pool, &sig, 1, Direction::Forward).is_ok());
		assert!(marshaller(pool, &sig, 1, Direction::Reverse).is_err());
	}
}
