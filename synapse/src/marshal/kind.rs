use crate::descriptor::{CharSet, MethodPolicy, NativeTypeTag};
use crate::marshal::MarshallerRole;
use crate::types::{PrimitiveType, Type, TypeKind};

/// The marshalling strategy selected for one value. A closed sum: every
/// `(type, descriptor, policy, role)` combination maps to exactly one tag.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum MarshallerKind {
	BlittableValue,
	Enum,
	UnicodeChar,
	AnsiChar,
	/// 4-byte Win32 BOOL.
	Bool,
	/// 1-byte C99 _Bool.
	CBool,
	Decimal,
	Guid,
	OleDateTime,
	Struct,
	BlittableStruct,
	BlittableStructPtr,
	HandleRef,
	SafeHandle,
	CriticalHandle,
	AnsiString,
	UnicodeString,
	AnsiStringBuilder,
	UnicodeStringBuilder,
	Array,
	BlittableArray,
	AnsiCharArray,
	ByValArray,
	ByValAnsiCharArray,
	FunctionPointer,
	Variant,
	Object,
	VoidReturn,
	Unknown,
	Invalid,
}

impl MarshallerKind {
	/// Kinds the emitter layer implements. The classifier can produce more;
	/// the rest are rejected when the marshaller is constructed.
	pub(crate) fn has_emitter(self) -> bool {
		matches!(
			self,
			MarshallerKind::VoidReturn
				| MarshallerKind::BlittableValue
				| MarshallerKind::Enum
				| MarshallerKind::BlittableStruct
				| MarshallerKind::UnicodeChar
				| MarshallerKind::Bool
				| MarshallerKind::CBool
				| MarshallerKind::BlittableStructPtr
				| MarshallerKind::UnicodeString
				| MarshallerKind::AnsiString
				| MarshallerKind::UnicodeStringBuilder
				| MarshallerKind::Array
				| MarshallerKind::BlittableArray
				| MarshallerKind::SafeHandle
				| MarshallerKind::FunctionPointer
		)
	}
}

/// Classifies a managed type against its interop descriptor.
///
/// `ty` must already be unwrapped from any by-ref shell. `native` is the
/// descriptor's native tag, `sub` its array sub-type. Returns the kind plus
/// the element kind for array shapes (`Invalid` otherwise). First match wins
/// within each arm; an unmarshallable combination yields
/// [`MarshallerKind::Invalid`].
pub fn kind_for<'l>(
	ty: &'l Type<'l>,
	native: Option<NativeTypeTag>,
	sub: Option<NativeTypeTag>,
	policy: &MethodPolicy,
	role: MarshallerRole,
	is_return: bool,
) -> (MarshallerKind, MarshallerKind) {
	match ty.kind() {
		TypeKind::Primitive => (primitive_kind(ty.primitive().unwrap(), native, policy), MarshallerKind::Invalid),
		TypeKind::Enum => (MarshallerKind::Enum, MarshallerKind::Invalid),
		TypeKind::ValueType => (value_type_kind(ty, native, policy, role, is_return), MarshallerKind::Invalid),
		TypeKind::Class => (class_kind(ty, native, policy), MarshallerKind::Invalid),
		TypeKind::Array => array_kind(ty, native, sub, policy, role, is_return),
		TypeKind::Pointer => match native {
			None => (MarshallerKind::BlittableValue, MarshallerKind::Invalid),
			Some(_) => (MarshallerKind::Invalid, MarshallerKind::Invalid),
		},
		// by-ref shells are unwrapped by the caller
		TypeKind::ByRef => (MarshallerKind::Invalid, MarshallerKind::Invalid),
	}
}

fn primitive_kind(primitive: PrimitiveType, native: Option<NativeTypeTag>, policy: &MethodPolicy) -> MarshallerKind {
	use crate::descriptor::NativeTypeTag as N;
	match primitive {
		PrimitiveType::Void => MarshallerKind::VoidReturn,
		PrimitiveType::Boolean => match native {
			None | Some(N::Boolean) => MarshallerKind::Bool,
			Some(N::I1 | N::U1) => MarshallerKind::CBool,
			Some(_) => MarshallerKind::Invalid,
		},
		PrimitiveType::Char => match native {
			Some(N::I1 | N::U1) => MarshallerKind::AnsiChar,
			Some(N::I2 | N::U2) => MarshallerKind::UnicodeChar,
			None => match policy.effective_char_set() {
				CharSet::Ansi => MarshallerKind::AnsiChar,
				_ => MarshallerKind::UnicodeChar,
			},
			Some(_) => MarshallerKind::Invalid,
		},
		PrimitiveType::Int8 | PrimitiveType::UInt8 => match native {
			None | Some(N::I1 | N::U1) => MarshallerKind::BlittableValue,
			Some(_) => MarshallerKind::Invalid,
		},
		PrimitiveType::Int16 | PrimitiveType::UInt16 => match native {
			None | Some(N::I2 | N::U2) => MarshallerKind::BlittableValue,
			Some(_) => MarshallerKind::Invalid,
		},
		PrimitiveType::Int32 | PrimitiveType::UInt32 => match native {
			None | Some(N::I4 | N::U4) => MarshallerKind::BlittableValue,
			Some(_) => MarshallerKind::Invalid,
		},
		PrimitiveType::Int64 | PrimitiveType::UInt64 => match native {
			None | Some(N::I8 | N::U8) => MarshallerKind::BlittableValue,
			Some(_) => MarshallerKind::Invalid,
		},
		PrimitiveType::IntPtr | PrimitiveType::UIntPtr => match native {
			None => MarshallerKind::BlittableValue,
			Some(_) => MarshallerKind::Invalid,
		},
		PrimitiveType::Single => match native {
			None | Some(N::R4) => MarshallerKind::BlittableValue,
			Some(_) => MarshallerKind::Invalid,
		},
		PrimitiveType::Double => match native {
			None | Some(N::R8) => MarshallerKind::BlittableValue,
			Some(_) => MarshallerKind::Invalid,
		},
	}
}

fn value_type_kind(
	ty: &Type,
	native: Option<NativeTypeTag>,
	policy: &MethodPolicy,
	role: MarshallerRole,
	is_return: bool,
) -> MarshallerKind {
	use crate::descriptor::NativeTypeTag as N;
	if policy.is_date_time(ty) {
		return match native {
			None | Some(N::Struct) => MarshallerKind::OleDateTime,
			Some(_) => MarshallerKind::Invalid,
		};
	}
	if policy.is_decimal(ty) {
		return match native {
			None | Some(N::Struct) => MarshallerKind::Decimal,
			Some(N::LPStruct) if role == MarshallerRole::Argument && !is_return => MarshallerKind::BlittableStructPtr,
			Some(_) => MarshallerKind::Invalid,
		};
	}
	if policy.is_guid(ty) {
		return match (native, role) {
			(Some(N::LPStruct), MarshallerRole::Argument) if !is_return => MarshallerKind::BlittableStructPtr,
			(_, MarshallerRole::Element) => MarshallerKind::BlittableValue,
			_ => match ty.is_blittable() {
				true => MarshallerKind::BlittableStruct,
				false => MarshallerKind::Struct,
			},
		};
	}
	if policy.is_handle_ref(ty) {
		return MarshallerKind::HandleRef;
	}
	match ty.is_blittable() {
		true => MarshallerKind::BlittableStruct,
		false => MarshallerKind::Struct,
	}
}

fn class_kind(ty: &Type, native: Option<NativeTypeTag>, policy: &MethodPolicy) -> MarshallerKind {
	use crate::descriptor::NativeTypeTag as N;
	if policy.is_string(ty) {
		return string_kind(native, policy);
	}
	if policy.is_string_builder(ty) {
		return match string_kind(native, policy) {
			MarshallerKind::UnicodeString => MarshallerKind::UnicodeStringBuilder,
			MarshallerKind::AnsiString => MarshallerKind::AnsiStringBuilder,
			_ => MarshallerKind::Invalid,
		};
	}
	if policy.is_delegate(ty) {
		return match native {
			None | Some(N::Func) => MarshallerKind::FunctionPointer,
			Some(_) => MarshallerKind::Invalid,
		};
	}
	if policy.is_object(ty) {
		return match native {
			None => MarshallerKind::Variant,
			Some(_) => MarshallerKind::Invalid,
		};
	}
	if policy.is_safe_handle(ty) {
		return match native {
			None => MarshallerKind::SafeHandle,
			Some(_) => MarshallerKind::Invalid,
		};
	}
	if policy.is_critical_handle(ty) {
		return match native {
			None => MarshallerKind::CriticalHandle,
			Some(_) => MarshallerKind::Invalid,
		};
	}
	MarshallerKind::Invalid
}

fn string_kind(native: Option<NativeTypeTag>, policy: &MethodPolicy) -> MarshallerKind {
	use crate::descriptor::NativeTypeTag as N;
	match native {
		Some(N::LPWStr) => MarshallerKind::UnicodeString,
		Some(N::LPStr) => MarshallerKind::AnsiString,
		None => match policy.effective_char_set() {
			CharSet::Ansi => MarshallerKind::AnsiString,
			_ => MarshallerKind::UnicodeString,
		},
		Some(_) => MarshallerKind::Invalid,
	}
}

fn array_kind<'l>(
	ty: &'l Type<'l>,
	native: Option<NativeTypeTag>,
	sub: Option<NativeTypeTag>,
	policy: &MethodPolicy,
	role: MarshallerRole,
	is_return: bool,
) -> (MarshallerKind, MarshallerKind) {
	use crate::descriptor::NativeTypeTag as N;
	let invalid = (MarshallerKind::Invalid, MarshallerKind::Invalid);
	let element = ty.element().unwrap();
	// an absent descriptor defaults the native representation to a C array
	match native.unwrap_or(N::Array) {
		N::Array => {
			if role == MarshallerRole::Field || is_return {
				return invalid;
			}
			let (element_kind, _) = kind_for(element, sub, None, policy, MarshallerRole::Element, false);
			match element_kind {
				MarshallerKind::Invalid => invalid,
				MarshallerKind::AnsiChar => (MarshallerKind::AnsiCharArray, element_kind),
				MarshallerKind::UnicodeChar | MarshallerKind::Enum | MarshallerKind::BlittableValue => {
					(MarshallerKind::BlittableArray, element_kind)
				}
				_ => (MarshallerKind::Array, element_kind),
			}
		}
		N::ByValArray => {
			let (element_kind, _) = kind_for(element, sub, None, policy, MarshallerRole::Element, false);
			match element_kind {
				MarshallerKind::Invalid => invalid,
				MarshallerKind::AnsiChar => (MarshallerKind::ByValAnsiCharArray, element_kind),
				_ => (MarshallerKind::ByValArray, element_kind),
			}
		}
		_ => invalid,
	}
}

#[cfg(test)]
mod tests {
	use bumpalo::Bump;

	use crate::descriptor::MarshalAsDescriptor;
	use crate::types::TypePool;

	use super::*;
	use crate::marshal::kind::MarshallerKind as K;
	use crate::descriptor::NativeTypeTag as N;

	fn classify<'l>(
		ty: &'l Type<'l>,
		native: Option<NativeTypeTag>,
		policy: &MethodPolicy,
	) -> MarshallerKind {
		kind_for(ty, native, None, policy, MarshallerRole::Argument, false).0
	}

	#[test]
	fn primitives() {
		let bump = Bump::new();
		let pool: &TypePool = bump.alloc(TypePool::new(&bump));
		let policy = MethodPolicy::default();
		let void = pool.get_primitive(PrimitiveType::Void);
		let boolean = pool.get_primitive(PrimitiveType::Boolean);
		let char_ = pool.get_primitive(PrimitiveType::Char);
		let int32 = pool.get_primitive(PrimitiveType::Int32);
		let intptr = pool.get_primitive(PrimitiveType::IntPtr);
		let double = pool.get_primitive(PrimitiveType::Double);

		assert_eq!(classify(void, None, &policy), K::VoidReturn);
		assert_eq!(classify(boolean, None, &policy), K::Bool);
		assert_eq!(classify(boolean, Some(N::Boolean), &policy), K::Bool);
		assert_eq!(classify(boolean, Some(N::U1), &policy), K::CBool);
		assert_eq!(classify(boolean, Some(N::I4), &policy), K::Invalid);
		assert_eq!(classify(char_, None, &policy), K::UnicodeChar);
		assert_eq!(classify(char_, Some(N::I1), &policy), K::AnsiChar);
		assert_eq!(classify(char_, Some(N::U2), &policy), K::UnicodeChar);
		assert_eq!(classify(char_, Some(N::I4), &policy), K::Invalid);
		assert_eq!(classify(int32, None, &policy), K::BlittableValue);
		assert_eq!(classify(int32, Some(N::U4), &policy), K::BlittableValue);
		assert_eq!(classify(int32, Some(N::I8), &policy), K::Invalid);
		assert_eq!(classify(intptr, None, &policy), K::BlittableValue);
		assert_eq!(classify(intptr, Some(N::SysInt), &policy), K::Invalid);
		assert_eq!(classify(double, Some(N::R8), &policy), K::BlittableValue);
		assert_eq!(classify(double, Some(N::R4), &policy), K::Invalid);
	}

	#[test]
	fn char_follows_the_method_char_set() {
		let bump = Bump::new();
		let pool: &TypePool = bump.alloc(TypePool::new(&bump));
		let char_ = pool.get_primitive(PrimitiveType::Char);
		let ansi = MethodPolicy::with_char_set(CharSet::Ansi);
		let auto = MethodPolicy::with_char_set(CharSet::Auto);
		assert_eq!(classify(char_, None, &ansi), K::AnsiChar);
		assert_eq!(classify(char_, None, &auto), K::UnicodeChar);
	}

	#[test]
	fn value_types() {
		let bump = Bump::new();
		let pool: &TypePool = bump.alloc(TypePool::new(&bump));
		let policy = MethodPolicy::default();
		let known = pool.known();
		let color = pool.define_enum("Demo", "Color", PrimitiveType::Int32);
		let point = pool.define_value_type("Demo", "Point", true);
		let header = pool.define_value_type("Demo", "Header", false);

		assert_eq!(classify(color, None, &policy), K::Enum);
		assert_eq!(classify(known.date_time, None, &policy), K::OleDateTime);
		assert_eq!(classify(known.date_time, Some(N::Struct), &policy), K::OleDateTime);
		assert_eq!(classify(known.date_time, Some(N::I8), &policy), K::Invalid);
		assert_eq!(classify(known.decimal, None, &policy), K::Decimal);
		assert_eq!(classify(known.decimal, Some(N::LPStruct), &policy), K::BlittableStructPtr);
		assert_eq!(classify(known.handle_ref, None, &policy), K::HandleRef);
		assert_eq!(classify(point, None, &policy), K::BlittableStruct);
		assert_eq!(classify(header, None, &policy), K::Struct);
	}

	#[test]
	fn lpstruct_is_argument_only() {
		let bump = Bump::new();
		let pool: &TypePool = bump.alloc(TypePool::new(&bump));
		let policy = MethodPolicy::default();
		let known = pool.known();
		let (as_return, _) = kind_for(known.decimal, Some(N::LPStruct), None, &policy, MarshallerRole::Argument, true);
		assert_eq!(as_return, K::Invalid);
		let (as_field, _) = kind_for(known.decimal, Some(N::LPStruct), None, &policy, MarshallerRole::Field, false);
		assert_eq!(as_field, K::Invalid);
		let (guid_arg, _) = kind_for(known.guid, Some(N::LPStruct), None, &policy, MarshallerRole::Argument, false);
		assert_eq!(guid_arg, K::BlittableStructPtr);
		let (guid_element, _) = kind_for(known.guid, None, None, &policy, MarshallerRole::Element, false);
		assert_eq!(guid_element, K::BlittableValue);
		assert_eq!(classify(known.guid, None, &policy), K::BlittableStruct);
	}

	#[test]
	fn reference_types() {
		let bump = Bump::new();
		let pool: &TypePool = bump.alloc(TypePool::new(&bump));
		let policy = MethodPolicy::default();
		let ansi = MethodPolicy::with_char_set(CharSet::Ansi);
		let known = pool.known();
		let callback = pool.define_delegate("Demo", "Callback");
		let handle = pool.define_handle("Demo", "FileHandle");
		let plain = pool.define_class("Demo", "Widget");

		assert_eq!(classify(known.string, None, &policy), K::UnicodeString);
		assert_eq!(classify(known.string, None, &ansi), K::AnsiString);
		assert_eq!(classify(known.string, Some(N::LPStr), &policy), K::AnsiString);
		assert_eq!(classify(known.string, Some(N::LPWStr), &ansi), K::UnicodeString);
		assert_eq!(classify(known.string, Some(N::BStr), &policy), K::Invalid);
		assert_eq!(classify(known.string_builder, None, &policy), K::UnicodeStringBuilder);
		assert_eq!(classify(known.string_builder, None, &ansi), K::AnsiStringBuilder);
		assert_eq!(classify(callback, None, &policy), K::FunctionPointer);
		assert_eq!(classify(callback, Some(N::Func), &policy), K::FunctionPointer);
		assert_eq!(classify(callback, Some(N::I4), &policy), K::Invalid);
		assert_eq!(classify(known.object, None, &policy), K::Variant);
		assert_eq!(classify(known.object, Some(N::Struct), &policy), K::Invalid);
		assert_eq!(classify(handle, None, &policy), K::SafeHandle);
		assert_eq!(classify(handle, Some(N::I4), &policy), K::Invalid);
		assert_eq!(classify(known.critical_handle, None, &policy), K::CriticalHandle);
		assert_eq!(classify(plain, None, &policy), K::Invalid);
	}

	#[test]
	fn arrays() {
		let bump = Bump::new();
		let pool: &TypePool = bump.alloc(TypePool::new(&bump));
		let policy = MethodPolicy::default();
		let ansi = MethodPolicy::with_char_set(CharSet::Ansi);
		let known = pool.known();
		let int_array = pool.get_array(pool.get_primitive(PrimitiveType::Int32));
		let char_array = pool.get_array(pool.get_primitive(PrimitiveType::Char));
		let bool_array = pool.get_array(pool.get_primitive(PrimitiveType::Boolean));
		let string_array = pool.get_array(known.string);

		let classify_array = |ty, native, sub, policy: &MethodPolicy| {
			kind_for(ty, native, sub, policy, MarshallerRole::Argument, false)
		};

		assert_eq!(classify_array(int_array, None, None, &policy), (K::BlittableArray, K::BlittableValue));
		assert_eq!(classify_array(char_array, None, None, &policy), (K::BlittableArray, K::UnicodeChar));
		assert_eq!(classify_array(char_array, None, None, &ansi), (K::AnsiCharArray, K::AnsiChar));
		assert_eq!(classify_array(bool_array, None, None, &policy), (K::Array, K::Bool));
		assert_eq!(classify_array(string_array, None, None, &policy), (K::Array, K::UnicodeString));
		// the sub-type overrides the element classification
		assert_eq!(
			classify_array(bool_array, Some(N::Array), Some(N::U1), &policy),
			(K::BlittableArray, K::CBool)
		);
		assert_eq!(
			classify_array(char_array, Some(N::ByValArray), Some(N::U1), &policy),
			(K::ByValAnsiCharArray, K::AnsiChar)
		);
		assert_eq!(
			classify_array(int_array, Some(N::ByValArray), None, &policy),
			(K::ByValArray, K::BlittableValue)
		);
		assert_eq!(classify_array(int_array, Some(N::Struct), None, &policy), (K::Invalid, K::Invalid));
	}

	#[test]
	fn arrays_are_rejected_as_fields_and_returns() {
		let bump = Bump::new();
		let pool: &TypePool = bump.alloc(TypePool::new(&bump));
		let policy = MethodPolicy::default();
		let int_array = pool.get_array(pool.get_primitive(PrimitiveType::Int32));
		let (as_return, _) = kind_for(int_array, None, None, &policy, MarshallerRole::Argument, true);
		assert_eq!(as_return, K::Invalid);
		let (as_field, _) = kind_for(int_array, None, None, &policy, MarshallerRole::Field, false);
		assert_eq!(as_field, K::Invalid);
	}

	#[test]
	fn pointers() {
		let bump = Bump::new();
		let pool: &TypePool = bump.alloc(TypePool::new(&bump));
		let policy = MethodPolicy::default();
		let ptr = pool.get_pointer(pool.get_primitive(PrimitiveType::Int32));
		assert_eq!(classify(ptr, None, &policy), K::BlittableValue);
		assert_eq!(classify(ptr, Some(N::I4), &policy), K::Invalid);
	}

	#[test]
	fn classification_is_idempotent() {
		let bump = Bump::new();
		let pool: &TypePool = bump.alloc(TypePool::new(&bump));
		let policy = MethodPolicy::default();
		let descriptor = MarshalAsDescriptor::new(N::Array);
		let int_array = pool.get_array(pool.get_primitive(PrimitiveType::Int32));
		let first = kind_for(int_array, Some(descriptor.native_type), None, &policy, MarshallerRole::Argument, false);
		let second = kind_for(int_array, Some(descriptor.native_type), None, &policy, MarshallerRole::Argument, false);
		assert_eq!(first, second);
	}

	#[test]
	fn nested_arrays() {
		let bump = Bump::new();
		let pool: &TypePool = bump.alloc(TypePool::new(&bump));
		let policy = MethodPolicy::default();
		let inner = pool.get_array(pool.get_primitive(PrimitiveType::Int32));
		let nested = pool.get_array(inner);
		assert_eq!(
			kind_for(nested, None, None, &policy, MarshallerRole::Argument, false),
			(K::Array, K::BlittableArray)
		);
	}
}
