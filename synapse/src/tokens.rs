use std::fmt::{Debug, Formatter};

use fxhash::FxHashMap;
use paste::paste;

use crate::types::Type;

macro_rules! define_metadata_token {
	($($id: ident = $discriminant: literal),*) => {
		#[repr(u32)]
		#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
		pub enum MetadataTokenKind {
			$($id = $discriminant),*
		}

		#[repr(transparent)]
		#[derive(Copy, Clone, Eq, PartialEq, Hash)]
		pub struct MetadataToken(u32);

		impl MetadataToken {
			pub fn kind(&self) -> MetadataTokenKind {
				let discriminant = (self.0 & 0xFF000000) >> 24;
				match discriminant {
					$($discriminant => MetadataTokenKind::$id,)*
					_ => unreachable!(),
				}
			}

			#[inline]
			pub fn index(&self) -> usize {
				(self.0 & 0x00FFFFFF) as usize
			}

			#[inline]
			pub fn raw(&self) -> u32 {
				self.0
			}
		}

		impl TryFrom<u32> for MetadataToken {
			type Error = ();
			fn try_from(value: u32) -> Result<Self, Self::Error> {
				let discriminant = (value & 0xFF000000) >> 24;
				match discriminant {
					$($discriminant => Ok(Self(value)),)*
					_ => Err(())
				}
			}
		}

		paste! {
			$(
				#[repr(transparent)]
				#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
				pub struct [<$id Token>](pub usize);

				impl From<[<$id Token>]> for MetadataToken {
					fn from(value: [<$id Token>]) -> Self {
						MetadataToken(((MetadataTokenKind::$id as u32) << 24) | value.0 as u32)
					}
				}

				impl TryFrom<MetadataToken> for [<$id Token>] {
					type Error = ();
					fn try_from(value: MetadataToken) -> Result<Self, Self::Error> {
						match value.kind() {
							MetadataTokenKind::$id => Ok(Self(value.index())),
							_ => Err(()),
						}
					}
				}
			)*
		}
	};
}

impl Debug for MetadataToken {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		write!(f, "MetadataToken::{:?}(", self.kind())?;
		self.index().fmt(f)?;
		write!(f, ")")
	}
}

define_metadata_token! {
	TypeRef = 0x01,
	TypeDef = 0x02,
	MethodDef = 0x06,
	MemberRef = 0x0a,
	TypeSpec = 0x1b
}

/// Well-known interop helper entry points referenced by the generated stubs.
///
/// These are resolved against the host's symbol table once, not looked up by
/// name during emission.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum HelperMethod {
	CoTaskMemAllocAndZeroMemory,
	CoTaskMemFree,
	StringToAnsi,
	AnsiStringToString,
	GetEmptyStringBuilderBuffer,
	GetStubForPInvokeDelegate,
	OffsetToStringData,
	StringCtorCharPtr,
	SafeHandleDangerousAddRef,
	SafeHandleDangerousRelease,
	SafeHandleDangerousGetHandle,
	SafeHandleSetHandle,
	StringBuilderReplaceBuffer,
}

impl HelperMethod {
	pub fn namespace(&self) -> &'static str {
		match self {
			HelperMethod::CoTaskMemAllocAndZeroMemory
			| HelperMethod::CoTaskMemFree
			| HelperMethod::StringToAnsi
			| HelperMethod::AnsiStringToString
			| HelperMethod::GetEmptyStringBuilderBuffer
			| HelperMethod::GetStubForPInvokeDelegate => "Internal.Runtime.CompilerHelpers",
			HelperMethod::OffsetToStringData => "System.Runtime.CompilerServices",
			HelperMethod::StringCtorCharPtr => "System",
			HelperMethod::SafeHandleDangerousAddRef
			| HelperMethod::SafeHandleDangerousRelease
			| HelperMethod::SafeHandleDangerousGetHandle
			| HelperMethod::SafeHandleSetHandle => "System.Runtime.InteropServices",
			HelperMethod::StringBuilderReplaceBuffer => "System.Text",
		}
	}

	pub fn type_name(&self) -> &'static str {
		match self {
			HelperMethod::CoTaskMemAllocAndZeroMemory
			| HelperMethod::CoTaskMemFree
			| HelperMethod::StringToAnsi
			| HelperMethod::AnsiStringToString
			| HelperMethod::GetEmptyStringBuilderBuffer
			| HelperMethod::GetStubForPInvokeDelegate => "InteropHelpers",
			HelperMethod::OffsetToStringData => "RuntimeHelpers",
			HelperMethod::StringCtorCharPtr => "String",
			HelperMethod::SafeHandleDangerousAddRef
			| HelperMethod::SafeHandleDangerousRelease
			| HelperMethod::SafeHandleDangerousGetHandle
			| HelperMethod::SafeHandleSetHandle => "SafeHandle",
			HelperMethod::StringBuilderReplaceBuffer => "StringBuilder",
		}
	}

	pub fn method_name(&self) -> &'static str {
		match self {
			HelperMethod::CoTaskMemAllocAndZeroMemory => "CoTaskMemAllocAndZeroMemory",
			HelperMethod::CoTaskMemFree => "CoTaskMemFree",
			HelperMethod::StringToAnsi => "StringToAnsi",
			HelperMethod::AnsiStringToString => "AnsiStringToString",
			HelperMethod::GetEmptyStringBuilderBuffer => "GetEmptyStringBuilderBuffer",
			HelperMethod::GetStubForPInvokeDelegate => "GetStubForPInvokeDelegate",
			HelperMethod::OffsetToStringData => "get_OffsetToStringData",
			HelperMethod::StringCtorCharPtr => ".ctor",
			HelperMethod::SafeHandleDangerousAddRef => "DangerousAddRef",
			HelperMethod::SafeHandleDangerousRelease => "DangerousRelease",
			HelperMethod::SafeHandleDangerousGetHandle => "DangerousGetHandle",
			HelperMethod::SafeHandleSetHandle => "SetHandle",
			HelperMethod::StringBuilderReplaceBuffer => "ReplaceBuffer",
		}
	}
}

/// Host-supplied mapping from types, helper entry points and constructors to
/// metadata tokens. The stub generator resolves each referenced symbol once
/// and embeds the token in the instruction stream.
pub trait TokenResolver: Debug {
	fn type_token(&mut self, ty: &Type) -> MetadataToken;
	fn helper_token(&mut self, helper: HelperMethod) -> MetadataToken;
	fn default_ctor_token(&mut self, ty: &Type) -> MetadataToken;
}

/// A [`TokenResolver`] that assigns sequential tokens, for tests and demos.
#[derive(Debug, Default)]
pub struct TableTokenResolver {
	next_type: usize,
	next_method: usize,
	types: FxHashMap<usize, MetadataToken>,
	ctors: FxHashMap<usize, MetadataToken>,
	helpers: FxHashMap<HelperMethod, MetadataToken>,
}

impl TableTokenResolver {
	pub fn new() -> Self {
		Default::default()
	}
}

impl TokenResolver for TableTokenResolver {
	fn type_token(&mut self, ty: &Type) -> MetadataToken {
		let key = ty as *const Type as usize;
		if let Some(token) = self.types.get(&key) {
			return *token;
		}
		self.next_type += 1;
		let token = TypeDefToken(self.next_type).into();
		self.types.insert(key, token);
		token
	}

	fn helper_token(&mut self, helper: HelperMethod) -> MetadataToken {
		if let Some(token) = self.helpers.get(&helper) {
			return *token;
		}
		self.next_method += 1;
		let token = MemberRefToken(self.next_method).into();
		self.helpers.insert(helper, token);
		token
	}

	fn default_ctor_token(&mut self, ty: &Type) -> MetadataToken {
		let key = ty as *const Type as usize;
		if let Some(token) = self.ctors.get(&key) {
			return *token;
		}
		self.next_method += 1;
		let token = MethodDefToken(self.next_method).into();
		self.ctors.insert(key, token);
		token
	}
}
