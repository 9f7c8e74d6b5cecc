use bumpalo::Bump;

use synapse::descriptor::{CharSet, MarshalAsDescriptor, MethodPolicy, NativeTypeTag, ParamAttributes};
use synapse::il::OpCode;
use synapse::marshal::{generate_stub, Direction, MethodSignature};
use synapse::tokens::{HelperMethod, TableTokenResolver, TokenResolver};
use synapse::types::{PrimitiveType, TypePool};

fn pushes(instructions: &[OpCode]) -> usize {
	instructions
		.iter()
		.filter(|op| matches!(op, OpCode::ldarg(_) | OpCode::ldloc(_) | OpCode::ldloca(_)))
		.count()
}

#[test]
fn int_argument_passes_straight_through() {
	let bump = Bump::new();
	let pool: &TypePool = bump.alloc(TypePool::new(&bump));
	let void = pool.get_primitive(PrimitiveType::Void);
	let int32 = pool.get_primitive(PrimitiveType::Int32);

	let mut sig = MethodSignature::new(MethodPolicy::default(), void, None);
	sig.add_parameter(int32, ParamAttributes::empty(), None);
	let stub = generate_stub(pool, &sig, Direction::Forward, Box::new(TableTokenResolver::new())).unwrap();

	let streams = stub.streams();
	assert!(streams.marshalling.is_empty());
	assert_eq!(streams.call_site_setup.instructions(), [OpCode::ldarg(0)]);
	assert!(streams.unmarshalling.is_empty());
	assert!(streams.cleanup.is_empty());
	assert!(streams.return_value.is_empty());
	assert!(stub.locals().is_empty());
}

#[test]
fn out_ref_int_pins_the_caller_slot() {
	let bump = Bump::new();
	let pool: &TypePool = bump.alloc(TypePool::new(&bump));
	let void = pool.get_primitive(PrimitiveType::Void);
	let int32 = pool.get_primitive(PrimitiveType::Int32);

	let mut sig = MethodSignature::new(MethodPolicy::default(), void, None);
	sig.add_parameter(pool.get_by_ref(int32), ParamAttributes::OUT, None);
	let stub = generate_stub(pool, &sig, Direction::Forward, Box::new(TableTokenResolver::new())).unwrap();

	let streams = stub.streams();
	assert_eq!(
		streams.marshalling.instructions(),
		[OpCode::ldarg(0), OpCode::stloc(0), OpCode::ldloc(0), OpCode::conv_i, OpCode::stloc(1)]
	);
	assert_eq!(streams.call_site_setup.instructions(), [OpCode::ldloc(1)]);

	let locals = stub.locals();
	assert_eq!(locals.len(), 2);
	assert!(locals[0].pinned);
	assert_eq!(locals[0].ty, pool.get_by_ref(int32));
	assert_eq!(locals[1].ty, pool.get_primitive(PrimitiveType::IntPtr));
}

#[test]
fn unicode_string_return_materialises_without_transcoding() {
	let bump = Bump::new();
	let pool: &TypePool = bump.alloc(TypePool::new(&bump));
	let string = pool.known().string;

	let mut resolver = TableTokenResolver::new();
	let ctor = resolver.helper_token(HelperMethod::StringCtorCharPtr);
	let transcode = resolver.helper_token(HelperMethod::AnsiStringToString);

	let sig = MethodSignature::new(MethodPolicy::default(), string, None);
	let stub = generate_stub(pool, &sig, Direction::Forward, Box::new(resolver)).unwrap();

	let streams = stub.streams();
	assert!(streams.marshalling.is_empty());
	assert!(streams.call_site_setup.is_empty());
	assert_eq!(
		streams.return_value.instructions(),
		[OpCode::stloc(1), OpCode::ldloc(1), OpCode::newobj(ctor), OpCode::stloc(0), OpCode::ldloc(0)]
	);
	assert!(!streams.return_value.instructions().contains(&OpCode::call(transcode)));
}

#[test]
fn ansi_string_argument_transcodes_and_pins() {
	let bump = Bump::new();
	let pool: &TypePool = bump.alloc(TypePool::new(&bump));
	let void = pool.get_primitive(PrimitiveType::Void);
	let string = pool.known().string;

	let mut resolver = TableTokenResolver::new();
	let transcode = resolver.helper_token(HelperMethod::StringToAnsi);
	let free = resolver.helper_token(HelperMethod::CoTaskMemFree);

	let mut sig = MethodSignature::new(MethodPolicy::with_char_set(CharSet::Ansi), void, None);
	sig.add_parameter(string, ParamAttributes::empty(), None);
	let stub = generate_stub(pool, &sig, Direction::Forward, Box::new(resolver)).unwrap();

	let streams = stub.streams();
	assert!(streams.marshalling.instructions().contains(&OpCode::call(transcode)));
	// pin-based: no unmanaged buffer, no free
	assert!(!stub.assemble().contains(&OpCode::call(free)));
	assert!(stub.locals().iter().any(|local| local.pinned));
	assert_eq!(pushes(streams.call_site_setup.instructions()), 1);
}

#[test]
fn blittable_array_pins_its_first_element() {
	let bump = Bump::new();
	let pool: &TypePool = bump.alloc(TypePool::new(&bump));
	let int32 = pool.get_primitive(PrimitiveType::Int32);

	let mut resolver = TableTokenResolver::new();
	let alloc = resolver.helper_token(HelperMethod::CoTaskMemAllocAndZeroMemory);

	let mut sig = MethodSignature::new(MethodPolicy::with_char_set(CharSet::Unicode), int32, None);
	sig.add_parameter(pool.get_array(int32), ParamAttributes::empty(), None);
	let stub = generate_stub(pool, &sig, Direction::Forward, Box::new(resolver)).unwrap();

	let streams = stub.streams();
	// no copying: the array is pinned in place
	assert!(!streams.marshalling.instructions().contains(&OpCode::call(alloc)));
	assert!(streams.marshalling.instructions().iter().any(|op| matches!(op, OpCode::ldelema(_))));
	assert!(stub.locals().iter().any(|local| local.pinned));
	// null and empty arrays fall through to a zero native pointer
	let zero_stores = streams
		.marshalling
		.instructions()
		.windows(2)
		.filter(|window| matches!(window, [OpCode::ldc_i4(0), OpCode::conv_i]))
		.count();
	assert_eq!(zero_stores, 1);
	assert_eq!(pushes(streams.call_site_setup.instructions()), 1);
	// blittable int return flows through untouched
	assert!(streams.return_value.is_empty());
}

#[test]
fn string_builder_borrows_and_replaces_its_buffer() {
	let bump = Bump::new();
	let pool: &TypePool = bump.alloc(TypePool::new(&bump));
	let void = pool.get_primitive(PrimitiveType::Void);
	let builder = pool.known().string_builder;

	let mut resolver = TableTokenResolver::new();
	let borrow = resolver.helper_token(HelperMethod::GetEmptyStringBuilderBuffer);
	let replace = resolver.helper_token(HelperMethod::StringBuilderReplaceBuffer);

	let mut sig = MethodSignature::new(MethodPolicy::default(), void, None);
	sig.add_parameter(builder, ParamAttributes::empty(), None);
	let stub = generate_stub(pool, &sig, Direction::Forward, Box::new(resolver)).unwrap();

	let streams = stub.streams();
	assert!(streams.marshalling.instructions().contains(&OpCode::call(borrow)));
	assert!(streams.unmarshalling.instructions().contains(&OpCode::callvirt(replace)));
	assert!(stub.locals().iter().any(|local| local.pinned));
}

#[test]
fn safe_handle_add_ref_is_paired_with_release() {
	let bump = Bump::new();
	let pool: &TypePool = bump.alloc(TypePool::new(&bump));
	let void = pool.get_primitive(PrimitiveType::Void);
	let handle = pool.define_handle("Demo", "FileHandle");

	let mut resolver = TableTokenResolver::new();
	let add_ref = resolver.helper_token(HelperMethod::SafeHandleDangerousAddRef);
	let get_handle = resolver.helper_token(HelperMethod::SafeHandleDangerousGetHandle);
	let release = resolver.helper_token(HelperMethod::SafeHandleDangerousRelease);

	let mut sig = MethodSignature::new(MethodPolicy::default(), void, None);
	sig.add_parameter(handle, ParamAttributes::empty(), None);
	let stub = generate_stub(pool, &sig, Direction::Forward, Box::new(resolver)).unwrap();

	let streams = stub.streams();
	assert!(streams.marshalling.instructions().contains(&OpCode::callvirt(add_ref)));
	assert!(streams.marshalling.instructions().contains(&OpCode::callvirt(get_handle)));
	assert!(streams.unmarshalling.instructions().contains(&OpCode::callvirt(release)));
}

#[test]
fn out_safe_handle_is_created_and_written_back() {
	let bump = Bump::new();
	let pool: &TypePool = bump.alloc(TypePool::new(&bump));
	let void = pool.get_primitive(PrimitiveType::Void);
	let handle = pool.define_handle("Demo", "FileHandle");

	let mut resolver = TableTokenResolver::new();
	let set_handle = resolver.helper_token(HelperMethod::SafeHandleSetHandle);
	let release = resolver.helper_token(HelperMethod::SafeHandleDangerousRelease);

	let mut sig = MethodSignature::new(MethodPolicy::default(), void, None);
	sig.add_parameter(pool.get_by_ref(handle), ParamAttributes::OUT, None);
	let stub = generate_stub(pool, &sig, Direction::Forward, Box::new(resolver)).unwrap();

	let streams = stub.streams();
	assert!(matches!(streams.marshalling.instructions()[0], OpCode::newobj(_)));
	assert_eq!(streams.call_site_setup.instructions(), [OpCode::ldloca(1)]);
	assert!(streams.unmarshalling.instructions().contains(&OpCode::callvirt(set_handle)));
	// the write-back goes through the by-ref argument
	assert!(streams.unmarshalling.instructions().contains(&OpCode::ldarg(0)));
	assert!(!streams.unmarshalling.instructions().contains(&OpCode::callvirt(release)));
}

#[test]
fn general_array_allocation_is_paired_with_a_free() {
	let bump = Bump::new();
	let pool: &TypePool = bump.alloc(TypePool::new(&bump));
	let void = pool.get_primitive(PrimitiveType::Void);
	let bool_array = pool.get_array(pool.get_primitive(PrimitiveType::Boolean));

	let mut resolver = TableTokenResolver::new();
	let alloc = resolver.helper_token(HelperMethod::CoTaskMemAllocAndZeroMemory);
	let free = resolver.helper_token(HelperMethod::CoTaskMemFree);

	let mut descriptor = MarshalAsDescriptor::new(NativeTypeTag::Array);
	descriptor.size_param_index = Some(1);
	let mut sig = MethodSignature::new(MethodPolicy::default(), void, None);
	sig.add_parameter(bool_array, ParamAttributes::IN | ParamAttributes::OUT, Some(descriptor));
	sig.add_parameter(pool.get_primitive(PrimitiveType::Int32), ParamAttributes::empty(), None);
	let stub = generate_stub(pool, &sig, Direction::Forward, Box::new(resolver)).unwrap();

	let streams = stub.streams();
	assert!(streams.marshalling.instructions().contains(&OpCode::call(alloc)));
	assert!(streams.cleanup.instructions().contains(&OpCode::call(free)));
	// the element count on the way back reads the count parameter
	assert!(streams.unmarshalling.instructions().contains(&OpCode::ldarg(1)));
	// two arguments, two pushes
	assert_eq!(pushes(streams.call_site_setup.instructions()), 2);
}

#[test]
fn bool_canonicalisation_runs_in_both_directions() {
	let bump = Bump::new();
	let pool: &TypePool = bump.alloc(TypePool::new(&bump));
	let boolean = pool.get_primitive(PrimitiveType::Boolean);

	let mut sig = MethodSignature::new(MethodPolicy::default(), boolean, None);
	sig.add_parameter(boolean, ParamAttributes::empty(), None);
	let stub = generate_stub(pool, &sig, Direction::Forward, Box::new(TableTokenResolver::new())).unwrap();

	let streams = stub.streams();
	let ceq_count = |ops: &[OpCode]| ops.iter().filter(|op| matches!(op, OpCode::ceq)).count();
	// (x == 0) == 0 on the way in
	assert_eq!(ceq_count(streams.marshalling.instructions()), 2);
	// and again for the return value
	assert_eq!(ceq_count(streams.return_value.instructions()), 2);
}

#[test]
fn reverse_blittable_arguments_pass_through() {
	let bump = Bump::new();
	let pool: &TypePool = bump.alloc(TypePool::new(&bump));
	let int32 = pool.get_primitive(PrimitiveType::Int32);

	let mut sig = MethodSignature::new(MethodPolicy::default(), int32, None);
	sig.add_parameter(int32, ParamAttributes::empty(), None);
	sig.add_parameter(pool.get_primitive(PrimitiveType::Double), ParamAttributes::empty(), None);
	let stub = generate_stub(pool, &sig, Direction::Reverse, Box::new(TableTokenResolver::new())).unwrap();

	let streams = stub.streams();
	assert!(streams.marshalling.is_empty());
	assert_eq!(streams.call_site_setup.instructions(), [OpCode::ldarg(0), OpCode::ldarg(1)]);
	assert!(streams.return_value.is_empty());
}

#[test]
fn reverse_ansi_string_argument_materialises_a_managed_string() {
	let bump = Bump::new();
	let pool: &TypePool = bump.alloc(TypePool::new(&bump));
	let void = pool.get_primitive(PrimitiveType::Void);
	let string = pool.known().string;

	let mut resolver = TableTokenResolver::new();
	let decode = resolver.helper_token(HelperMethod::AnsiStringToString);

	let mut sig = MethodSignature::new(MethodPolicy::with_char_set(CharSet::Ansi), void, None);
	sig.add_parameter(string, ParamAttributes::empty(), None);
	let stub = generate_stub(pool, &sig, Direction::Reverse, Box::new(resolver)).unwrap();

	let streams = stub.streams();
	assert!(streams.marshalling.instructions().contains(&OpCode::call(decode)));
	assert_eq!(pushes(streams.call_site_setup.instructions()), 1);
}

#[test]
fn assembled_streams_keep_the_fixed_order() {
	let bump = Bump::new();
	let pool: &TypePool = bump.alloc(TypePool::new(&bump));
	let string = pool.known().string;
	let bool_array = pool.get_array(pool.get_primitive(PrimitiveType::Boolean));

	let mut resolver = TableTokenResolver::new();
	let alloc = resolver.helper_token(HelperMethod::CoTaskMemAllocAndZeroMemory);
	let free = resolver.helper_token(HelperMethod::CoTaskMemFree);
	let ctor = resolver.helper_token(HelperMethod::StringCtorCharPtr);

	let mut sig = MethodSignature::new(MethodPolicy::default(), string, None);
	sig.add_parameter(bool_array, ParamAttributes::IN | ParamAttributes::OUT, Some(MarshalAsDescriptor::new(NativeTypeTag::Array)));
	let stub = generate_stub(pool, &sig, Direction::Forward, Box::new(resolver)).unwrap();

	let code = stub.assemble();
	let position = |op: OpCode| code.iter().position(|candidate| *candidate == op).unwrap();
	// marshal → call site → unmarshal/cleanup → return value
	assert!(position(OpCode::call(alloc)) < position(OpCode::call(free)));
	assert!(position(OpCode::call(free)) < position(OpCode::newobj(ctor)));
}
