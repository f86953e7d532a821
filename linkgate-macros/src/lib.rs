use proc_macro::TokenStream;
use proc_macro2::Span;
use quote::{format_ident, quote};
use std::collections::HashMap;
use syn::{
    Data, DeriveInput, Error as SynError, Fields, Generics, Ident, LitInt, LitStr,
    Result as SynResult,
    parse::{Parse, ParseStream},
    parse_macro_input, parse_quote,
};

struct CodeAttr {
    value: u32,
    span: Span,
}

impl Parse for CodeAttr {
    fn parse(input: ParseStream) -> SynResult<Self> {
        let lit: LitInt = input.parse()?;
        Ok(Self {
            value: lit.base10_parse()?,
            span: lit.span(),
        })
    }
}

struct VariantInfo {
    ident: Ident,
    fields: Fields,
    code: Option<CodeAttr>,
}

struct EnumInput {
    ident: Ident,
    generics: Generics,
    variants: Vec<VariantInfo>,
}

impl Parse for EnumInput {
    fn parse(input: ParseStream) -> SynResult<Self> {
        let di: DeriveInput = input.parse()?;
        let ident = di.ident;
        let generics = di.generics;
        let data = match di.data {
            Data::Enum(e) => e,
            _ => {
                return Err(SynError::new(
                    Span::call_site(),
                    "BusinessError can only be derived for enums",
                ));
            }
        };
        let mut variants = Vec::new();
        for v in data.variants {
            let code = v
                .attrs
                .iter()
                .find(|a| a.path().is_ident("code"))
                .map(|a| a.parse_args::<CodeAttr>())
                .transpose()?;
            variants.push(VariantInfo {
                ident: v.ident,
                fields: v.fields,
                code,
            });
        }
        Ok(Self {
            ident,
            generics,
            variants,
        })
    }
}

/// Implements `crate::errors::BusinessErrCode` for an error enum.
///
/// Variants tagged with `#[code(N)]` report `Some(N)`, everything else reports `None`.
/// Each code also emits a zero-sized exported symbol, so two enums claiming the same
/// code anywhere in the binary fail at link time.
#[proc_macro_derive(BusinessError, attributes(code))]
pub fn derive_business_error(input: TokenStream) -> TokenStream {
    let EnumInput {
        ident,
        generics,
        variants,
    } = parse_macro_input!(input as EnumInput);
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let mut seen: HashMap<u32, &Ident> = HashMap::new();
    let mut some_arms = Vec::new();
    let mut guards = Vec::new();

    for v in variants.iter() {
        let Some(code) = &v.code else {
            continue;
        };
        if let Some(prev) = seen.insert(code.value, &v.ident) {
            return SynError::new(
                code.span,
                format!("code {} is already used by `{}`", code.value, prev),
            )
            .to_compile_error()
            .into();
        }
        let v_ident = &v.ident;
        let value = code.value;
        let pat = match &v.fields {
            Fields::Unit => quote!(Self::#v_ident),
            Fields::Unnamed(_) => quote!(Self::#v_ident(..)),
            Fields::Named(_) => quote!(Self::#v_ident { .. }),
        };
        some_arms.push(quote!(#pat => Some(#value),));
        let guard_ident = format_ident!("__BIZ_ERR_CODE_GUARD__{}_{}_{}", ident, v_ident, value);
        let guard_export_name = LitStr::new(&format!("__biz_err_code__{}", value), Span::call_site());
        guards.push(quote! {
            #[doc(hidden)]
            #[used]
            #[allow(non_upper_case_globals)]
            #[unsafe(export_name = #guard_export_name)]
            #[cfg_attr(target_vendor = "apple", unsafe(link_section = "__DATA,.biz_err_code"))]
            #[cfg_attr(not(target_vendor = "apple"), unsafe(link_section = ".biz_err_code"))]
            static #guard_ident: [u8; 0] = [];
        });
    }

    let biz_trait: syn::Path = parse_quote!(crate::errors::BusinessErrCode);
    let expanded = quote! {
        #[automatically_derived]
        impl #impl_generics #biz_trait for #ident #ty_generics #where_clause {
            fn code(&self) -> Option<u32> {
                #[allow(unreachable_patterns)]
                match self {
                    #(#some_arms)*
                    _ => None
                }
            }
        }
        #(#guards)*
    };
    TokenStream::from(expanded)
}
