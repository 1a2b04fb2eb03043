mod model;

use proc_macro::TokenStream;

// ============================================================================
// #[derive(Model)] derive macro
// ============================================================================

/// Derive macro for the `Model` trait.
///
/// # Usage
///
/// ```ignore
/// #[derive(Clone, Serialize, Deserialize, Model)]
/// #[model(collection = "users/user", meeting_scoped = false)]
/// struct User {
///     #[model(id)]
///     pub id: u64,
///     pub username: String,
/// }
/// ```
///
/// - `collection` defaults to the snake_case struct name.
/// - `meeting_scoped` defaults to `true`.
/// - The id field defaults to a field named `id` and must be a `u64`.
#[proc_macro_derive(Model, attributes(model))]
pub fn derive_model(input: TokenStream) -> TokenStream {
    model::derive_model(input)
}
