use bitflags::bitflags;
use synapse_derive::FromRepr;

use crate::types::{SpecialType, Type};

/// Native type tags as they appear in `FieldMarshal` blobs (ECMA-335 §II.23.4,
/// plus the runtime extensions).
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, FromRepr)]
pub enum NativeTypeTag {
	Boolean = 0x02,
	I1 = 0x03,
	U1 = 0x04,
	I2 = 0x05,
	U2 = 0x06,
	I4 = 0x07,
	U4 = 0x08,
	I8 = 0x09,
	U8 = 0x0a,
	R4 = 0x0b,
	R8 = 0x0c,
	Currency = 0x0f,
	BStr = 0x13,
	LPStr = 0x14,
	LPWStr = 0x15,
	LPTStr = 0x16,
	ByValTStr = 0x17,
	IUnknown = 0x19,
	IDispatch = 0x1a,
	Struct = 0x1b,
	Interface = 0x1c,
	SafeArray = 0x1d,
	ByValArray = 0x1e,
	SysInt = 0x1f,
	SysUInt = 0x20,
	Func = 0x26,
	AsAny = 0x28,
	Array = 0x2a,
	LPStruct = 0x2b,
	CustomMarshaler = 0x2c,
	Error = 0x2d,
}

#[repr(u8)]
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash, FromRepr)]
pub enum CharSet {
	Ansi = 2,
	#[default]
	Unicode = 3,
	Auto = 4,
}

/// The `MarshalAs` record attached to a parameter or field.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct MarshalAsDescriptor {
	pub native_type: NativeTypeTag,
	pub array_sub_type: Option<NativeTypeTag>,
	pub size_const: Option<u32>,
	pub size_param_index: Option<u16>,
}

impl MarshalAsDescriptor {
	pub fn new(native_type: NativeTypeTag) -> Self {
		Self {
			native_type,
			array_sub_type: None,
			size_const: None,
			size_param_index: None,
		}
	}
}

bitflags! {
	#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash)]
	pub struct ParamAttributes: u16 {
		const IN = 0x0001;
		const OUT = 0x0002;
		const OPTIONAL = 0x0010;
	}
}

/// Per-parameter interop metadata as supplied by the host compiler.
/// Index 0 designates the return value.
#[derive(Debug, Clone)]
pub struct ParameterMetadata {
	pub index: u16,
	pub attributes: ParamAttributes,
	pub marshal_as: Option<MarshalAsDescriptor>,
}

impl ParameterMetadata {
	pub fn new(index: u16, attributes: ParamAttributes, marshal_as: Option<MarshalAsDescriptor>) -> Self {
		Self { index, attributes, marshal_as }
	}

	#[inline]
	pub fn is_in(&self) -> bool {
		self.attributes.contains(ParamAttributes::IN)
	}

	#[inline]
	pub fn is_out(&self) -> bool {
		self.attributes.contains(ParamAttributes::OUT)
	}

	#[inline]
	pub fn is_optional(&self) -> bool {
		self.attributes.contains(ParamAttributes::OPTIONAL)
	}

	#[inline]
	pub fn is_return(&self) -> bool {
		self.index == 0
	}

	#[inline]
	pub fn native_tag(&self) -> Option<NativeTypeTag> {
		self.marshal_as.map(|m| m.native_type)
	}

	#[inline]
	pub fn array_sub_tag(&self) -> Option<NativeTypeTag> {
		self.marshal_as.and_then(|m| m.array_sub_type)
	}
}

/// Method-level marshalling policy: the effective character set plus the
/// well-known-type recognisers the classifier consults.
#[derive(Debug, Default, Copy, Clone)]
pub struct MethodPolicy {
	pub char_set: CharSet,
}

impl MethodPolicy {
	pub fn with_char_set(char_set: CharSet) -> Self {
		Self { char_set }
	}

	/// `Auto` resolves to the platform default character set.
	pub fn effective_char_set(&self) -> CharSet {
		match self.char_set {
			CharSet::Auto => CharSet::Unicode,
			other => other,
		}
	}

	pub fn is_string(&self, ty: &Type) -> bool {
		ty.special() == Some(SpecialType::String)
	}

	pub fn is_string_builder(&self, ty: &Type) -> bool {
		ty.special() == Some(SpecialType::StringBuilder)
	}

	pub fn is_object(&self, ty: &Type) -> bool {
		ty.special() == Some(SpecialType::Object)
	}

	pub fn is_system_array(&self, ty: &Type) -> bool {
		ty.special() == Some(SpecialType::SystemArray)
	}

	pub fn is_decimal(&self, ty: &Type) -> bool {
		ty.special() == Some(SpecialType::Decimal)
	}

	pub fn is_guid(&self, ty: &Type) -> bool {
		ty.special() == Some(SpecialType::Guid)
	}

	pub fn is_date_time(&self, ty: &Type) -> bool {
		ty.special() == Some(SpecialType::DateTime)
	}

	pub fn is_safe_handle(&self, ty: &Type) -> bool {
		ty.special() == Some(SpecialType::SafeHandle)
	}

	pub fn is_critical_handle(&self, ty: &Type) -> bool {
		ty.special() == Some(SpecialType::CriticalHandle)
	}

	pub fn is_handle_ref(&self, ty: &Type) -> bool {
		ty.special() == Some(SpecialType::HandleRef)
	}

	pub fn is_delegate(&self, ty: &Type) -> bool {
		ty.special() == Some(SpecialType::Delegate)
	}
}
