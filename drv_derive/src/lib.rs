use proc_macro2::TokenStream;
use quote::quote;
use syn::{spanned::Spanned, Attribute, Data, DataStruct, DeriveInput, Error, Fields, Result};

/// Bytes to skip before a field, from its `skip_N` attributes.
fn skip_before(attrs: &[Attribute]) -> usize {
	attrs
		.iter()
		.filter_map(|attr| attr.path().get_ident())
		.map(|ident| match ident.to_string().as_str() {
			"skip_1" => 1,
			"skip_2" => 2,
			"skip_4" => 4,
			"skip_8" => 8,
			_ => 0,
		})
		.sum()
}

fn read_derive_impl(input: &DeriveInput) -> Result<TokenStream> {
	let fields = match &input.data {
		Data::Struct(DataStruct { fields: Fields::Named(fields), .. }) => &fields.named,
		_ => return Err(Error::new(input.span(), "Readable can only be derived for structs with named fields")),
	};
	let reads = fields.iter().map(|field| {
		let ident = &field.ident;
		let skip = skip_before(&field.attrs);
		let skip = (skip > 0).then(|| quote! { drv_reader::skip(reader, #skip)?; });
		quote! {
			#skip
			let #ident = drv_reader::Readable::read(reader)?;
		}
	});
	let idents = fields.iter().map(|field| &field.ident);
	let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
	let type_name = &input.ident;
	Ok(quote! {
		impl #impl_generics drv_reader::Readable for #type_name #ty_generics #where_clause {
			fn read<R: std::io::Read>(reader: &mut R) -> std::io::Result<Self> {
				#(#reads)*
				Ok(#type_name { #(#idents),* })
			}
		}
	})
}

/// Reads each field in declaration order, little-endian. `#[skip_N]` skips N bytes before a field.
#[proc_macro_derive(Readable, attributes(skip_1, skip_2, skip_4, skip_8))]
pub fn read_derive(tokens: proc_macro::TokenStream) -> proc_macro::TokenStream {
	let input = syn::parse_macro_input!(tokens as DeriveInput);
	read_derive_impl(&input).unwrap_or_else(Error::into_compile_error).into()
}
