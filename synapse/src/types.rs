use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::{Debug, Display, Formatter};
use std::hash::{Hash, Hasher};

use bumpalo::Bump;
use bumpalo::collections::String as BumpString;
use derivative::Derivative;
use nohash_hasher::BuildNoHashHasher;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum TypeKind {
	Class,
	ValueType,
	Enum,
	Array,
	Pointer,
	ByRef,
	Primitive,
}

#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash)]
pub enum PrimitiveType {
	#[default]
	Void,
	Boolean,
	Char,
	Int8,
	UInt8,
	Int16,
	UInt16,
	Int32,
	UInt32,
	Int64,
	UInt64,
	Single,
	Double,
	IntPtr,
	UIntPtr,
}

/// Well-known System types the marshalling rules single out.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum SpecialType {
	String,
	StringBuilder,
	Object,
	SystemArray,
	Decimal,
	Guid,
	DateTime,
	SafeHandle,
	CriticalHandle,
	HandleRef,
	Delegate,
}

#[derive(Derivative)]
#[derivative(Debug)]
pub struct Type<'l> {
	#[derivative(Debug = "ignore")]
	pub(crate) pool: &'l TypePool<'l>,
	pub(crate) kind: TypeKind,
	pub(crate) name: &'l str,
	pub(crate) namespace: &'l str,
	pub(crate) primitive: Option<PrimitiveType>,
	pub(crate) special: Option<SpecialType>,
	/// Pointee, by-ref referent, array element or enum underlying type.
	pub(crate) element: Option<&'l Type<'l>>,
	pub(crate) blittable: bool,
}

impl<'l> Type<'l> {
	#[inline]
	pub fn kind(&self) -> TypeKind {
		self.kind
	}

	#[inline]
	pub fn name(&self) -> &'l str {
		self.name
	}

	#[inline]
	pub fn namespace(&self) -> &'l str {
		self.namespace
	}

	#[inline]
	pub fn primitive(&self) -> Option<PrimitiveType> {
		self.primitive
	}

	#[inline]
	pub fn special(&self) -> Option<SpecialType> {
		self.special
	}

	#[inline]
	pub fn element(&self) -> Option<&'l Type<'l>> {
		self.element
	}

	#[inline]
	pub fn pool(&self) -> &'l TypePool<'l> {
		self.pool
	}

	/// A type whose managed and native bit representations coincide.
	#[inline]
	pub fn is_blittable(&self) -> bool {
		self.blittable
	}

	#[inline]
	pub fn is_by_ref(&self) -> bool {
		self.kind == TypeKind::ByRef
	}

	/// The referent for by-ref types, the type itself otherwise.
	pub fn unwrap_by_ref(&'l self) -> &'l Type<'l> {
		match self.kind {
			TypeKind::ByRef => self.element.unwrap(),
			_ => self,
		}
	}

	pub fn is_value_type(&self) -> bool {
		matches!(self.kind, TypeKind::ValueType | TypeKind::Enum | TypeKind::Primitive)
	}

	/// Integer types accepted as element-count parameters.
	pub fn is_integral(&self) -> bool {
		matches!(
			self.primitive,
			Some(
				PrimitiveType::Int8
					| PrimitiveType::UInt8
					| PrimitiveType::Int16
					| PrimitiveType::UInt16
					| PrimitiveType::Int32
					| PrimitiveType::UInt32
					| PrimitiveType::Int64
					| PrimitiveType::UInt64
					| PrimitiveType::IntPtr
					| PrimitiveType::UIntPtr
			)
		)
	}
}

impl Display for Type<'_> {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		let (name, namespace) = (self.name(), self.namespace());
		match namespace.is_empty() {
			true => write!(f, "{}", name),
			false => write!(f, "{}.{}", namespace, name),
		}
	}
}

impl Eq for Type<'_> {}

impl PartialEq<Self> for Type<'_> {
	fn eq(&self, other: &Self) -> bool {
		std::ptr::eq(self, other)
	}
}

impl Hash for Type<'_> {
	fn hash<H: Hasher>(&self, state: &mut H) {
		(self as *const Type).hash(state)
	}
}

/// The well-known System types, preconstructed once per pool.
#[derive(Debug)]
pub struct WellKnownTypes<'l> {
	pub string: &'l Type<'l>,
	pub string_builder: &'l Type<'l>,
	pub object: &'l Type<'l>,
	pub system_array: &'l Type<'l>,
	pub decimal: &'l Type<'l>,
	pub guid: &'l Type<'l>,
	pub date_time: &'l Type<'l>,
	pub safe_handle: &'l Type<'l>,
	pub critical_handle: &'l Type<'l>,
	pub handle_ref: &'l Type<'l>,
	pub delegate: &'l Type<'l>,
}

pub struct TypePool<'l> {
	bump: &'l Bump,
	primitives: RefCell<HashMap<PrimitiveType, &'l Type<'l>, BuildNoHashHasher<usize>>>,
	pointers: RefCell<HashMap<*const Type<'l>, &'l Type<'l>, BuildNoHashHasher<usize>>>,
	by_refs: RefCell<HashMap<*const Type<'l>, &'l Type<'l>, BuildNoHashHasher<usize>>>,
	arrays: RefCell<HashMap<*const Type<'l>, &'l Type<'l>, BuildNoHashHasher<usize>>>,
	known: RefCell<Option<&'l WellKnownTypes<'l>>>,
}

impl<'l> TypePool<'l> {
	pub fn new(bump: &'l Bump) -> Self {
		Self {
			bump,
			primitives: Default::default(),
			pointers: Default::default(),
			by_refs: Default::default(),
			arrays: Default::default(),
			known: Default::default(),
		}
	}

	pub fn get_primitive(&'l self, ty: PrimitiveType) -> &'l Type<'l> {
		let mut primitives = self.primitives.borrow_mut();
		if let Some(ty) = primitives.get(&ty) {
			return ty;
		}
		primitives.entry(ty).or_insert_with(|| self.bump.alloc(Type {
			pool: self,
			kind: TypeKind::Primitive,
			namespace: "System",
			name: match ty {
				PrimitiveType::Void => "Void",
				PrimitiveType::Boolean => "Boolean",
				PrimitiveType::Char => "Char",
				PrimitiveType::Int8 => "SByte",
				PrimitiveType::UInt8 => "Byte",
				PrimitiveType::Int16 => "Int16",
				PrimitiveType::UInt16 => "UInt16",
				PrimitiveType::Int32 => "Int32",
				PrimitiveType::UInt32 => "UInt32",
				PrimitiveType::Int64 => "Int64",
				PrimitiveType::UInt64 => "UInt64",
				PrimitiveType::Single => "Single",
				PrimitiveType::Double => "Double",
				PrimitiveType::IntPtr => "IntPtr",
				PrimitiveType::UIntPtr => "UIntPtr",
			},
			primitive: Some(ty),
			special: None,
			element: None,
			// Booleans and chars have a marshalling policy, everything else is raw bits
			blittable: !matches!(ty, PrimitiveType::Void | PrimitiveType::Boolean | PrimitiveType::Char),
		}))
	}

	pub fn get_pointer(&'l self, ty: &'l Type<'l>) -> &'l Type<'l> {
		let mut pointers = self.pointers.borrow_mut();
		pointers.entry(ty as _).or_insert_with(|| self.bump.alloc(Type {
			pool: self,
			kind: TypeKind::Pointer,
			name: self.derived_name(ty, '*'),
			namespace: ty.namespace(),
			primitive: None,
			special: None,
			element: Some(ty),
			blittable: true,
		}))
	}

	pub fn get_by_ref(&'l self, ty: &'l Type<'l>) -> &'l Type<'l> {
		let mut by_refs = self.by_refs.borrow_mut();
		by_refs.entry(ty as _).or_insert_with(|| self.bump.alloc(Type {
			pool: self,
			kind: TypeKind::ByRef,
			name: self.derived_name(ty, '&'),
			namespace: ty.namespace(),
			primitive: None,
			special: None,
			element: Some(ty),
			blittable: false,
		}))
	}

	/// Single-dimensional, zero-based arrays. Multi-dimensional shapes are the
	/// host type system's business and never reach the marshaller.
	pub fn get_array(&'l self, ty: &'l Type<'l>) -> &'l Type<'l> {
		let mut arrays = self.arrays.borrow_mut();
		arrays.entry(ty as _).or_insert_with(|| {
			let mut name = BumpString::with_capacity_in(ty.name().len() + 2, self.bump);
			name.push_str(ty.name());
			name.push_str("[]");
			self.bump.alloc(Type {
				pool: self,
				kind: TypeKind::Array,
				name: name.into_bump_str(),
				namespace: ty.namespace(),
				primitive: None,
				special: None,
				element: Some(ty),
				blittable: false,
			})
		})
	}

	pub fn known(&'l self) -> &'l WellKnownTypes<'l> {
		if let Some(known) = *self.known.borrow() {
			return known;
		}
		let known = self.bump.alloc(WellKnownTypes {
			string: self.define_special(TypeKind::Class, "System", "String", SpecialType::String, false),
			string_builder: self.define_special(TypeKind::Class, "System.Text", "StringBuilder", SpecialType::StringBuilder, false),
			object: self.define_special(TypeKind::Class, "System", "Object", SpecialType::Object, false),
			system_array: self.define_special(TypeKind::Class, "System", "Array", SpecialType::SystemArray, false),
			decimal: self.define_special(TypeKind::ValueType, "System", "Decimal", SpecialType::Decimal, false),
			guid: self.define_special(TypeKind::ValueType, "System", "Guid", SpecialType::Guid, true),
			date_time: self.define_special(TypeKind::ValueType, "System", "DateTime", SpecialType::DateTime, true),
			safe_handle: self.define_special(TypeKind::Class, "System.Runtime.InteropServices", "SafeHandle", SpecialType::SafeHandle, false),
			critical_handle: self.define_special(TypeKind::Class, "System.Runtime.InteropServices", "CriticalHandle", SpecialType::CriticalHandle, false),
			handle_ref: self.define_special(TypeKind::ValueType, "System.Runtime.InteropServices", "HandleRef", SpecialType::HandleRef, false),
			delegate: self.define_special(TypeKind::Class, "System", "MulticastDelegate", SpecialType::Delegate, false),
		});
		*self.known.borrow_mut() = Some(known);
		known
	}

	pub fn define_value_type(&'l self, namespace: &str, name: &str, blittable: bool) -> &'l Type<'l> {
		self.define(TypeKind::ValueType, namespace, name, None, None, blittable)
	}

	pub fn define_class(&'l self, namespace: &str, name: &str) -> &'l Type<'l> {
		self.define(TypeKind::Class, namespace, name, None, None, false)
	}

	pub fn define_enum(&'l self, namespace: &str, name: &str, underlying: PrimitiveType) -> &'l Type<'l> {
		let underlying = self.get_primitive(underlying);
		self.define(TypeKind::Enum, namespace, name, None, Some(underlying), true)
	}

	/// A user delegate type (derives from `System.MulticastDelegate`).
	pub fn define_delegate(&'l self, namespace: &str, name: &str) -> &'l Type<'l> {
		self.define(TypeKind::Class, namespace, name, Some(SpecialType::Delegate), None, false)
	}

	/// A user handle type (derives from `SafeHandle`).
	pub fn define_handle(&'l self, namespace: &str, name: &str) -> &'l Type<'l> {
		self.define(TypeKind::Class, namespace, name, Some(SpecialType::SafeHandle), None, false)
	}

	fn define(
		&'l self,
		kind: TypeKind,
		namespace: &str,
		name: &str,
		special: Option<SpecialType>,
		element: Option<&'l Type<'l>>,
		blittable: bool,
	) -> &'l Type<'l> {
		self.bump.alloc(Type {
			pool: self,
			kind,
			name: self.bump.alloc_str(name),
			namespace: self.bump.alloc_str(namespace),
			primitive: None,
			special,
			element,
			blittable,
		})
	}

	fn define_special(
		&'l self,
		kind: TypeKind,
		namespace: &'static str,
		name: &'static str,
		special: SpecialType,
		blittable: bool,
	) -> &'l Type<'l> {
		self.bump.alloc(Type {
			pool: self,
			kind,
			name,
			namespace,
			primitive: None,
			special: Some(special),
			element: None,
			blittable,
		})
	}

	fn derived_name(&'l self, ty: &'l Type<'l>, suffix: char) -> &'l str {
		let mut name = BumpString::with_capacity_in(ty.name().len() + 1, self.bump);
		name.push_str(ty.name());
		name.push(suffix);
		name.into_bump_str()
	}
}

impl Debug for TypePool<'_> {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("TypePool").finish_non_exhaustive()
	}
}
