//! Implementation of the `#[handler]` macro.

use proc_macro2::TokenStream;
use quote::quote;
use syn::{
    parse2, Error, Expr, ExprLit, FnArg, GenericArgument, Ident, ImplItem, ImplItemFn, ItemImpl,
    Lit, Meta, PathArguments, Result, ReturnType, Type, Visibility,
};

/// Parsed macro attributes.
struct HandlerAttributes {
    name: Option<String>,
}

/// One method that qualifies as an endpoint.
struct EndpointMethod {
    method: Ident,
    name: String,
    input: Type,
    output: Type,
}

pub fn expand(attr: TokenStream, item: TokenStream) -> Result<TokenStream> {
    let attrs = parse_attributes(attr)?;
    let item: ItemImpl = parse2(item)?;

    if let Some((_, path, _)) = &item.trait_ {
        return Err(Error::new_spanned(
            path,
            "#[handler] must be placed on an inherent impl block",
        ));
    }

    let name = match attrs.name {
        Some(name) => name,
        None => type_name(&item.self_ty)?,
    };

    let endpoints: Vec<TokenStream> = item
        .items
        .iter()
        .filter_map(|item| match item {
            ImplItem::Fn(method) => EndpointMethod::from_method(method),
            _ => None,
        })
        .map(|endpoint| endpoint.expand())
        .collect();

    let self_ty = &item.self_ty;
    let (impl_generics, _, where_clause) = item.generics.split_for_impl();

    Ok(quote! {
        #item

        impl #impl_generics ::switchboard_node::router::Handler for #self_ty #where_clause {
            const NAME: &'static str = #name;

            fn endpoints<C: ::switchboard_node::router::Codec>()
                -> ::std::vec::Vec<::switchboard_node::router::Endpoint<Self, C>>
            {
                ::std::vec![#(#endpoints),*]
            }
        }
    })
}

fn parse_attributes(attr: TokenStream) -> Result<HandlerAttributes> {
    let mut attrs = HandlerAttributes { name: None };

    if attr.is_empty() {
        return Ok(attrs);
    }

    let meta: Meta = parse2(attr)?;

    match &meta {
        Meta::NameValue(nv) if nv.path.is_ident("name") => {
            if let Expr::Lit(ExprLit {
                lit: Lit::Str(lit_str),
                ..
            }) = &nv.value
            {
                attrs.name = Some(lit_str.value());
            } else {
                return Err(Error::new_spanned(&nv.value, "name must be a string literal"));
            }
        }
        _ => {
            return Err(Error::new_spanned(
                &meta,
                "Unknown attribute. Expected: name = \"HandlerName\"",
            ));
        }
    }

    Ok(attrs)
}

fn type_name(ty: &Type) -> Result<String> {
    if let Type::Path(type_path) = ty {
        if let Some(segment) = type_path.path.segments.last() {
            return Ok(segment.ident.to_string());
        }
    }

    Err(Error::new_spanned(
        ty,
        "cannot derive a handler name from this type; use #[handler(name = \"...\")]",
    ))
}

impl EndpointMethod {
    /// `None` for methods that do not have the endpoint shape
    fn from_method(method: &ImplItemFn) -> Option<Self> {
        let sig = &method.sig;

        if !matches!(method.vis, Visibility::Public(_))
            || sig.asyncness.is_none()
            || !sig.generics.params.is_empty()
            || !returns_unit_result(&sig.output)
        {
            return None;
        }

        let mut inputs = sig.inputs.iter();
        match inputs.next() {
            Some(FnArg::Receiver(receiver))
                if receiver.reference.is_some() && receiver.mutability.is_none() => {}
            _ => return None,
        }

        let args = inputs
            .map(|arg| match arg {
                FnArg::Typed(pat) => Some(&*pat.ty),
                FnArg::Receiver(_) => None,
            })
            .collect::<Option<Vec<&Type>>>()?;

        let [ctx, input, output] = args.as_slice() else {
            return None;
        };

        let Type::Reference(ctx) = ctx else {
            return None;
        };
        let Type::Reference(input) = input else {
            return None;
        };
        let Type::Reference(output) = output else {
            return None;
        };
        if ctx.mutability.is_some() || input.mutability.is_some() || output.mutability.is_none() {
            return None;
        }
        if !is_call_context(&ctx.elem) {
            return None;
        }

        Some(Self {
            method: sig.ident.clone(),
            name: pascal_case(&sig.ident.to_string()),
            input: (*input.elem).clone(),
            output: (*output.elem).clone(),
        })
    }

    fn expand(&self) -> TokenStream {
        let Self {
            method,
            name,
            input,
            output,
        } = self;

        quote! {
            ::switchboard_node::router::Endpoint::new(
                #name,
                |handler: ::std::sync::Arc<Self>,
                 ctx: ::switchboard_node::router::CallContext,
                 request: ::std::sync::Arc<::switchboard_node::router::Message>,
                 codec: C|
                 -> ::switchboard_node::router::EndpointFuture {
                    ::std::boxed::Box::pin(async move {
                        let input: #input =
                            ::switchboard_node::router::decode_input(&codec, &request.data)?;
                        let mut output: #output = ::core::default::Default::default();

                        handler
                            .#method(&ctx, &input, &mut output)
                            .await
                            .map_err(::switchboard_node::router::EndpointError::handler)?;

                        ::switchboard_node::router::encode_output(&codec, &output)
                    })
                },
            )
        }
    }
}

/// Matches `CallContext` under any path prefix
fn is_call_context(ty: &Type) -> bool {
    let Type::Path(type_path) = ty else {
        return false;
    };
    type_path
        .path
        .segments
        .last()
        .is_some_and(|segment| segment.ident == "CallContext" && segment.arguments.is_none())
}

/// Matches `Result<(), E>` and aliases of the form `Result<()>`
fn returns_unit_result(output: &ReturnType) -> bool {
    let ReturnType::Type(_, ty) = output else {
        return false;
    };
    let Type::Path(type_path) = &**ty else {
        return false;
    };
    let Some(segment) = type_path.path.segments.last() else {
        return false;
    };
    if segment.ident != "Result" {
        return false;
    }
    let PathArguments::AngleBracketed(args) = &segment.arguments else {
        return false;
    };

    matches!(
        args.args.first(),
        Some(GenericArgument::Type(Type::Tuple(tuple))) if tuple.elems.is_empty()
    )
}

fn pascal_case(ident: &str) -> String {
    ident
        .split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}
