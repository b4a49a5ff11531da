//! Proc-macro for gantry capability traits.
//!
//! This crate provides the `#[gateway]` attribute macro that turns a
//! capability trait into a typed proxy, a handler trait and a dispatch
//! registration function.
//!
//! # Example
//!
//! ```rust,ignore
//! use gantry::{gateway, RpcFuture};
//!
//! #[gateway]
//! pub trait TaskExecutor {
//!     fn submit_task(&self, job: String, slots: u32) -> RpcFuture<u64>;
//!     fn heartbeat(&self, from: String);
//! }
//! ```
//!
//! This generates:
//! - The trait itself, with `gantry::Gateway` as supertrait
//! - `TaskExecutorProxy` implementing the trait by posting invocations
//! - `TaskExecutorHandler`, the trait endpoints implement to serve calls
//! - `TaskExecutorProxy::register_handlers`, filling a `DispatchTable`

use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{
    FnArg, GenericArgument, Ident, ItemTrait, LitStr, Pat, PathArguments, ReturnType, TraitItem,
    Type, parse_macro_input,
};

/// Attribute macro declaring a capability.
///
/// # Attributes
///
/// - `#[gateway]` - The capability is named after the trait.
/// - `#[gateway(name = "...")]` - Sets the capability name explicitly.
///
/// # Methods
///
/// Each method takes `&self` plus any number of arguments and either
/// returns `RpcFuture<T>` (ask-style) or nothing (fire-and-forget).
/// Argument and result types must be serde-serializable so the same
/// proxy works against remote endpoints.
#[proc_macro_attribute]
pub fn gateway(attr: TokenStream, item: TokenStream) -> TokenStream {
    let attr = parse_macro_input!(attr as GatewayAttr);
    let item = parse_macro_input!(item as ItemTrait);

    match gateway_impl(attr, item) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

/// Method info extracted from trait methods.
struct MethodInfo {
    attrs: Vec<syn::Attribute>,
    name: Ident,
    arg_names: Vec<Ident>,
    arg_types: Vec<Type>,
    /// `Some(T)` for `RpcFuture<T>`, `None` for fire-and-forget.
    reply_type: Option<Type>,
}

impl MethodInfo {
    fn args_tuple(&self) -> proc_macro2::TokenStream {
        let names = &self.arg_names;
        quote! { (#(#names,)*) }
    }

    fn args_tuple_type(&self) -> proc_macro2::TokenStream {
        let types = &self.arg_types;
        quote! { (#(#types,)*) }
    }

    fn params(&self) -> Vec<proc_macro2::TokenStream> {
        self.arg_names
            .iter()
            .zip(&self.arg_types)
            .map(|(name, ty)| quote! { #name: #ty })
            .collect()
    }
}

fn gateway_impl(attr: GatewayAttr, item: ItemTrait) -> syn::Result<proc_macro2::TokenStream> {
    if !item.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &item.generics,
            "gateway traits cannot be generic",
        ));
    }

    let name = &item.ident;
    let vis = &item.vis;
    let trait_attrs = &item.attrs;
    let proxy_name = format_ident!("{}Proxy", name);
    let handler_name = format_ident!("{}Handler", name);
    let capability = attr
        .name
        .map(|lit| lit.value())
        .unwrap_or_else(|| name.to_string());

    let mut methods = Vec::new();
    for trait_item in &item.items {
        match trait_item {
            TraitItem::Fn(method) => methods.push(parse_method(method)?),
            other => {
                return Err(syn::Error::new_spanned(
                    other,
                    "gateway traits may only contain methods",
                ));
            }
        }
    }

    let supertraits = &item.supertraits;
    let extra_bounds = if supertraits.is_empty() {
        quote! {}
    } else {
        quote! { + #supertraits }
    };

    // Caller-facing trait
    let trait_methods = methods.iter().map(|m| {
        let attrs = &m.attrs;
        let method = &m.name;
        let params = m.params();
        match &m.reply_type {
            Some(reply) => quote! {
                #(#attrs)*
                fn #method(&self, #(#params),*) -> ::gantry::RpcFuture<#reply>;
            },
            None => quote! {
                #(#attrs)*
                fn #method(&self, #(#params),*);
            },
        }
    });

    // Proxy implementation: every call becomes an invocation
    let proxy_methods = methods.iter().map(|m| {
        let method = &m.name;
        let method_str = method.to_string();
        let params = m.params();
        let args = m.args_tuple();
        match &m.reply_type {
            Some(reply) => quote! {
                fn #method(&self, #(#params),*) -> ::gantry::RpcFuture<#reply> {
                    self.target.ask(#method_str, #args)
                }
            },
            None => quote! {
                fn #method(&self, #(#params),*) {
                    self.target.tell(#method_str, #args)
                }
            },
        }
    });

    // Endpoint-facing handler trait
    let handler_methods = methods.iter().map(|m| {
        let attrs = m.attrs.iter().filter(|a| a.path().is_ident("doc"));
        let method = &m.name;
        let params = m.params();
        match &m.reply_type {
            Some(reply) => quote! {
                #(#attrs)*
                fn #method(&mut self, ctx: &::gantry::EndpointContext<Self>, #(#params),*) -> ::gantry::Reply<#reply>;
            },
            None => quote! {
                #(#attrs)*
                fn #method(&mut self, ctx: &::gantry::EndpointContext<Self>, #(#params),*);
            },
        }
    });

    // Dispatch table registration
    let registrations = methods.iter().map(|m| {
        let method = &m.name;
        let method_str = method.to_string();
        let names = &m.arg_names;
        let pattern = m.args_tuple();
        let tuple_type = m.args_tuple_type();
        let register = if m.reply_type.is_some() {
            quote! { ask }
        } else {
            quote! { tell }
        };
        quote! {
            table.#register(
                #capability,
                #method_str,
                |__endpoint: &mut E, __ctx: &::gantry::EndpointContext<E>, #pattern: #tuple_type| {
                    <E as #handler_name>::#method(__endpoint, __ctx, #(#names),*)
                },
            );
        }
    });

    let proxy_doc = format!(
        "Gateway proxy for the `{}` capability.\n\nGenerated by `#[gateway]`. Obtain one through `RpcService::connect` or `Endpoint::self_gateway`.",
        capability
    );
    let handler_doc = format!(
        "Server side of the `{}` capability, implemented by endpoints.\n\nGenerated by `#[gateway]`.",
        capability
    );

    let expanded = quote! {
        #(#trait_attrs)*
        #vis trait #name: ::gantry::Gateway #extra_bounds {
            #(#trait_methods)*
        }

        #[doc = #proxy_doc]
        #[derive(Clone, Debug)]
        #vis struct #proxy_name {
            target: ::gantry::GatewayTarget,
        }

        impl #proxy_name {
            /// Register this capability's handlers for endpoint type `E`.
            ///
            /// Call from `RpcEndpoint::register_capabilities`.
            pub fn register_handlers<E: #handler_name>(table: &mut ::gantry::DispatchTable<E>) {
                #(#registrations)*
            }
        }

        impl ::gantry::Gateway for #proxy_name {
            fn address(&self) -> &::gantry::Address {
                self.target.address()
            }
        }

        impl ::gantry::Capability for #proxy_name {
            const NAME: &'static str = #capability;

            fn bind(target: ::gantry::GatewayTarget) -> Self {
                Self { target }
            }

            fn target(&self) -> &::gantry::GatewayTarget {
                &self.target
            }
        }

        impl #name for #proxy_name {
            #(#proxy_methods)*
        }

        #[doc = #handler_doc]
        #vis trait #handler_name: ::gantry::RpcEndpoint {
            #(#handler_methods)*
        }
    };

    Ok(expanded)
}

/// Extract argument names/types and the reply type of one method.
///
/// Expected signature: `fn name(&self, a: A, ...) -> RpcFuture<T>` or
/// `fn name(&self, a: A, ...)`.
fn parse_method(method: &syn::TraitItemFn) -> syn::Result<MethodInfo> {
    let sig = &method.sig;
    if sig.asyncness.is_some() {
        return Err(syn::Error::new_spanned(
            sig,
            "gateway methods must not be async; return RpcFuture<T> instead",
        ));
    }
    if !sig.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &sig.generics,
            "gateway methods cannot be generic",
        ));
    }

    let mut inputs = sig.inputs.iter();

    // First should be &self
    match inputs.next() {
        Some(FnArg::Receiver(receiver))
            if receiver.reference.is_some() && receiver.mutability.is_none() => {}
        _ => {
            return Err(syn::Error::new_spanned(
                sig,
                "gateway method must have &self as first parameter",
            ));
        }
    }

    let mut arg_names = Vec::new();
    let mut arg_types = Vec::new();
    for (index, input) in inputs.enumerate() {
        let FnArg::Typed(pat_type) = input else {
            return Err(syn::Error::new_spanned(input, "unexpected receiver"));
        };
        let name = match pat_type.pat.as_ref() {
            Pat::Ident(pat_ident) => pat_ident.ident.clone(),
            _ => format_ident!("arg{}", index),
        };
        // The handler trait passes the endpoint context as `ctx`.
        if name == "ctx" {
            return Err(syn::Error::new_spanned(
                &pat_type.pat,
                "`ctx` is reserved for the endpoint context in handler methods",
            ));
        }
        arg_names.push(name);
        arg_types.push((*pat_type.ty).clone());
    }

    let reply_type = match &sig.output {
        ReturnType::Default => None,
        ReturnType::Type(_, ty) => Some(extract_rpc_future_type(ty)?),
    };

    Ok(MethodInfo {
        attrs: method.attrs.clone(),
        name: sig.ident.clone(),
        arg_names,
        arg_types,
        reply_type,
    })
}

/// Extract `T` from `RpcFuture<T>`.
fn extract_rpc_future_type(ty: &Type) -> syn::Result<Type> {
    if let Type::Path(type_path) = ty
        && let Some(segment) = type_path.path.segments.last()
        && segment.ident == "RpcFuture"
        && let PathArguments::AngleBracketed(args) = &segment.arguments
        && let Some(GenericArgument::Type(reply)) = args.args.first()
    {
        return Ok(reply.clone());
    }

    Err(syn::Error::new_spanned(
        ty,
        "gateway method must return RpcFuture<T> or nothing",
    ))
}

// ============================================================================
// Attribute Parsing
// ============================================================================

/// Parsed gateway attribute.
struct GatewayAttr {
    name: Option<LitStr>,
}

impl syn::parse::Parse for GatewayAttr {
    fn parse(input: syn::parse::ParseStream) -> syn::Result<Self> {
        if input.is_empty() {
            return Ok(GatewayAttr { name: None });
        }

        let ident: Ident = input.parse()?;
        if ident != "name" {
            return Err(syn::Error::new_spanned(
                ident,
                "expected `name` in gateway attribute",
            ));
        }
        let _eq: syn::Token![=] = input.parse()?;
        let name: LitStr = input.parse()?;
        if name.value().is_empty() {
            return Err(syn::Error::new_spanned(
                name,
                "capability name must not be empty",
            ));
        }

        Ok(GatewayAttr { name: Some(name) })
    }
}
