use crate::descriptor::NativeTypeTag;
use crate::marshal::MarshallerKind;
use crate::types::{PrimitiveType, Type, TypePool};

/// Maps a marshaller kind to the native representation type.
///
/// Pure over `(kind, element_kind, managed, native)`. Returns `None` for the
/// kinds that have no representation at this layer (`ByValArray` shapes, COM
/// objects, `Unknown`). A by-ref *parameter* additionally wraps the result in
/// a pointer; that is the marshaller's business, not this function's.
pub fn native_type_of<'l>(
	pool: &'l TypePool<'l>,
	kind: MarshallerKind,
	element_kind: MarshallerKind,
	managed: &'l Type<'l>,
	native: Option<NativeTypeTag>,
	sub: Option<NativeTypeTag>,
) -> Option<&'l Type<'l>> {
	use crate::marshal::kind::MarshallerKind as K;
	use crate::descriptor::NativeTypeTag as N;
	use crate::types::PrimitiveType as P;
	Some(match kind {
		K::BlittableValue => match native {
			Some(N::I1) => pool.get_primitive(P::Int8),
			Some(N::U1) => pool.get_primitive(P::UInt8),
			Some(N::I2) => pool.get_primitive(P::Int16),
			Some(N::U2) => pool.get_primitive(P::UInt16),
			Some(N::I4) => pool.get_primitive(P::Int32),
			Some(N::U4) => pool.get_primitive(P::UInt32),
			Some(N::I8) => pool.get_primitive(P::Int64),
			Some(N::U8) => pool.get_primitive(P::UInt64),
			Some(N::R4) => pool.get_primitive(P::Single),
			Some(N::R8) => pool.get_primitive(P::Double),
			_ => managed,
		},
		K::Bool => pool.get_primitive(P::Int32),
		K::CBool => pool.get_primitive(P::UInt8),
		K::UnicodeChar => match native {
			Some(N::U2) => pool.get_primitive(P::UInt16),
			_ => pool.get_primitive(P::Int16),
		},
		K::AnsiChar => pool.get_primitive(P::UInt8),
		K::OleDateTime => pool.get_primitive(P::Double),
		K::SafeHandle | K::CriticalHandle | K::HandleRef | K::FunctionPointer => pool.get_primitive(P::IntPtr),
		K::UnicodeString | K::UnicodeStringBuilder => pool.get_pointer(pool.get_primitive(P::Char)),
		K::AnsiString | K::AnsiStringBuilder => pool.get_pointer(pool.get_primitive(P::UInt8)),
		K::Array | K::BlittableArray | K::AnsiCharArray => {
			let element = managed.element()?;
			let element_native = native_type_of(pool, element_kind, MarshallerKind::Invalid, element, sub, None)?;
			pool.get_pointer(element_native)
		}
		K::BlittableStructPtr => pool.get_pointer(managed),
		K::Enum | K::BlittableStruct | K::Struct | K::Decimal | K::Guid | K::VoidReturn => managed,
		K::ByValArray
		| K::ByValAnsiCharArray
		| K::Variant
		| K::Object
		| K::Unknown
		| K::Invalid => return None,
	})
}
