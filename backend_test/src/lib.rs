use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{parse_macro_input, spanned::Spanned, FnArg, Ident, ItemFn, Pat, Signature, Type};

/// Transform an asynchronous test into one that runs against a fresh
/// in-memory store, injecting dependencies and optionally logging in.
///
/// Injectable dependencies are [`rocket::local::asynchronous::Client`],
/// `crate::store::DynStore` and `crate::store::MemoryStore`; the latter two
/// are handles on the same store the client's server uses.
///
/// `#[backend_test(admin)]` logs the client in as an ordinary operator,
/// `#[backend_test(superadmin)]` as the bootstrap super administrator.
#[proc_macro_attribute]
pub fn backend_test(args: TokenStream, input: TokenStream) -> TokenStream {
    let item_fn = parse_macro_input!(input as ItemFn);

    // Extract type information and reject invalid function signatures.
    let test_args = match check_sig(item_fn.sig.clone()) {
        Ok(args) => args,
        Err(err) => {
            return err.into_compile_error().into();
        }
    };

    // Rename the future so the test can have its original name.
    let name = item_fn.sig.ident.clone();
    let new_name = format_ident!("{}_fut", name);
    let mut inner_fn = item_fn.clone();
    inner_fn.sig.ident = new_name.clone();

    // Log in the client as an operator if needed.
    // The response borrows the client, so it lives in its own block.
    let maybe_login_request = quote! {
        {
            let response = rocket_client
                .post("/auth/admin")
                .header(rocket::http::ContentType::JSON)
                .body(rocket::serde::json::json!(credentials).to_string())
                .dispatch()
                .await;
            assert_eq!(rocket::http::Status::Ok, response.status(), "test login failed");
        }
    };
    let maybe_login = match parse_macro_input!(args as Option<Ident>) {
        Some(arg) if arg == "admin" => quote! {
            store
                .insert_operator(&crate::model::db::admin::NewOperator::example())
                .await
                .unwrap();
            let credentials = crate::model::api::admin::AdminCredentials::example();
            #maybe_login_request
        },
        Some(arg) if arg == "superadmin" => quote! {
            let credentials = crate::model::api::admin::AdminCredentials::superadmin_example();
            #maybe_login_request
        },
        Some(arg) => {
            return syn::Error::new(arg.span(), "Expected `admin` or `superadmin`")
                .into_compile_error()
                .into();
        }
        None => TokenStream2::new(),
    };

    // Rewrite the test function.
    quote! {
        #[rocket::async_test]
        async fn #name() {
            log4rs_test_utils::test_logging::init_logging_once_for(
                ["ballotbox_backend"],
                None,
                None,
            );

            let memory_store = crate::store::MemoryStore::new();
            let store: crate::store::DynStore = std::sync::Arc::new(memory_store.clone());
            let rocket_client = rocket::local::asynchronous::Client::tracked(
                crate::rocket_for_store(store.clone()),
            )
            .await
            .unwrap();

            #maybe_login

            /// The test itself.
            #inner_fn

            #new_name(#(#test_args),*).await;
        }
    }
    .into()
}

/// Ensure the wrapped test is async, extract parameters to inject, and reject unknown parameters.
fn check_sig(sig: Signature) -> Result<Vec<TokenStream2>, syn::Error> {
    if sig.asyncness.is_none() {
        return Err(syn::Error::new(sig.span(), "Test must be marked `async`"));
    }

    let mut seen = vec![];
    let mut args = vec![];

    for input in &sig.inputs {
        if let FnArg::Typed(pat_type) = input {
            if let (Pat::Ident(_), Type::Path(type_path)) = (&*pat_type.pat, &*pat_type.ty) {
                if let Some(type_ident) = type_path.path.segments.last().map(|s| &s.ident) {
                    let arg = if type_ident == "Client" {
                        Some(quote! { rocket_client })
                    } else if type_ident == "DynStore" {
                        Some(quote! { store.clone() })
                    } else if type_ident == "MemoryStore" {
                        Some(quote! { memory_store.clone() })
                    } else {
                        None
                    };
                    if let Some(arg) = arg {
                        if seen.contains(type_ident) {
                            return Err(syn::Error::new(
                                input.span(),
                                format!("Test cannot accept more than one `{type_ident}`"),
                            ));
                        }
                        seen.push(type_ident.clone());
                        args.push(arg);
                        continue;
                    }
                }
            }
        }

        return Err(syn::Error::new(
            input.span(),
            "Expected one of `client_ident: Client`, `store_ident: DynStore` or `memory_ident: MemoryStore`",
        ));
    }

    Ok(args)
}
