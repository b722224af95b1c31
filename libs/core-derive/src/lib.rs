//! Procedural macros for Switchboard.
//!
//! Provides the `#[handler]` attribute, which scans an `impl` block once at
//! compile time and emits the endpoint table the router dispatches through.

mod handler;

use proc_macro::TokenStream;

/// Exposes the eligible methods of an `impl` block as RPC endpoints.
///
/// A method becomes an endpoint when it is `pub async`, takes `&self`, a
/// shared reference to the call context, a shared reference to its input and
/// a mutable reference to its output, and returns `Result<(), E>`. Any other
/// method is left alone. Endpoints are named after the method in PascalCase
/// (`get_user` becomes `GetUser`).
///
/// The handler name defaults to the type name and can be overridden with
/// `#[handler(name = "Users")]`.
///
/// # Example
///
/// ```ignore
/// use switchboard_node::prelude::*;
///
/// #[handler]
/// impl UserService {
///     pub async fn get_user(
///         &self,
///         _ctx: &CallContext,
///         input: &GetUserRequest,
///         output: &mut User,
///     ) -> Result<(), Status> {
///         *output = self.lookup(input.id).ok_or_else(|| Status::not_found("user not found"))?;
///         Ok(())
///     }
/// }
/// ```
#[proc_macro_attribute]
pub fn handler(attr: TokenStream, item: TokenStream) -> TokenStream {
    handler::expand(attr.into(), item.into())
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}
