use proc_macro2::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, parse_quote, Type};

pub fn derive(tokens: proc_macro::TokenStream) -> TokenStream {
	let DeriveInput {
		attrs,
		ident,
		generics,
		data,
		..
	} = syn::parse(tokens).unwrap();

	let data = match data {
		Data::Enum(data) => data,
		Data::Union(_) => panic!("Unions are not supported"),
		Data::Struct(_) => panic!("Structs are not supported"),
	};

	if !generics.params.is_empty() {
		panic!("Generics are not supported");
	}

	let mut repr: Type = parse_quote!(usize);
	for attr in attrs.iter() {
		if attr.path().is_ident("repr") {
			repr = attr.parse_args::<Type>().unwrap();
		}
	}

	let mut arms = Vec::with_capacity(data.variants.len());
	for variant in data.variants.iter() {
		let Some((_, discriminant)) = &variant.discriminant else {
			panic!("Explicit discriminant required for `{}`", variant.ident);
		};
		let variant_name = &variant.ident;
		arms.push(quote! {
			if discriminant == (#discriminant) as #repr {
				return Some(Self::#variant_name);
			}
		});
	}

	quote! {
		impl #ident {
			pub fn from_repr(discriminant: #repr) -> Option<Self> {
				#(#arms)*
				None
			}
		}
	}
}
