//! Procedural macros that remove closure-registry boilerplate.
//!
//! `#[closure("name")]` turns an `async fn(ProcessHandle, Arg) -> ()` into a
//! body registered under `name` in the process-wide closure registry, so a
//! remote `spawn(node, Closure::new("name", args))` can materialize it. The
//! registration itself happens at static-init time via `inventory`, the same
//! mechanism the rest of the workspace uses for collecting other
//! process-wide, statically-known sets.

use proc_macro::TokenStream;
use proc_macro2::Span;
use quote::quote;
use syn::{parse_macro_input, FnArg, Ident, ItemFn, LitStr, Pat, Type};

/// Register an `async fn(ProcessHandle, Arg)` as a named, remotely-spawnable
/// closure body.
///
/// ```ignore
/// #[meridian_macros::closure("echo")]
/// async fn echo(ctx: ProcessHandle, arg: i32) {
///     // ...
/// }
/// ```
#[proc_macro_attribute]
pub fn closure(attr: TokenStream, item: TokenStream) -> TokenStream {
    let name = parse_macro_input!(attr as LitStr);
    let input = parse_macro_input!(item as ItemFn);

    let fn_ident = input.sig.ident.clone();
    let entry_ident = Ident::new(&format!("__meridian_closure_entry_{fn_ident}"), Span::call_site());

    let arg_type = match extract_arg_type(&input) {
        Ok(ty) => ty,
        Err(err) => return err.to_compile_error().into(),
    };

    let expanded = quote! {
        #input

        #[allow(non_snake_case)]
        fn #entry_ident(
            ctx: ::meridian::process::ProcessHandle,
            bytes: ::std::vec::Vec<u8>,
        ) -> ::meridian::closure::BoxFuture<'static, ()> {
            ::std::boxed::Box::pin(async move {
                match <#arg_type as ::meridian::codec::Encodable>::decode_self(&bytes) {
                    ::std::result::Result::Ok(arg) => {
                        #fn_ident(ctx, arg).await;
                    }
                    ::std::result::Result::Err(err) => {
                        ctx.logger().error(format!(
                            "closure `{}` received undecodable arguments: {err}",
                            #name
                        ));
                    }
                }
            })
        }

        ::meridian::inventory::submit! {
            ::meridian::closure::ClosureEntry {
                name: #name,
                body: #entry_ident,
            }
        }
    };

    expanded.into()
}

/// Pull the type of the closure body's second parameter (the first is always
/// the `ProcessHandle`).
fn extract_arg_type(input: &ItemFn) -> syn::Result<Type> {
    let params: Vec<&FnArg> = input.sig.inputs.iter().collect();
    if params.len() != 2 {
        return Err(syn::Error::new_spanned(
            &input.sig,
            "#[closure(..)] functions must take exactly two arguments: (ProcessHandle, Arg)",
        ));
    }
    match params[1] {
        FnArg::Typed(pat_type) => {
            if !matches!(&*pat_type.pat, Pat::Ident(_)) {
                return Err(syn::Error::new_spanned(
                    pat_type,
                    "closure argument must be a simple identifier pattern",
                ));
            }
            Ok((*pat_type.ty).clone())
        }
        FnArg::Receiver(_) => Err(syn::Error::new_spanned(
            params[1],
            "#[closure(..)] cannot be applied to methods",
        )),
    }
}
