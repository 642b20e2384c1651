use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};

use super::{
    handlers,
    middleware::{admin_middleware, auth_middleware},
};
use crate::AppState;

pub fn create_router(state: AppState) -> Router<AppState> {
    // Public auth routes
    let auth_routes = Router::new()
        .route(
            "/request-phone-verification",
            post(handlers::auth::request_phone_verification),
        )
        .route(
            "/check-phone-verification",
            post(handlers::auth::check_phone_verification),
        )
        .route("/login", post(handlers::auth::login))
        .route("/refresh", post(handlers::auth::refresh_token));

    // Protected auth routes
    let auth_protected = Router::new()
        .route("/logout", post(handlers::auth::logout))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    // User routes (protected)
    let user_routes = Router::new()
        .route("/me", get(handlers::users::get_current_user))
        .route("/me", put(handlers::users::update_current_user))
        .route("/me", delete(handlers::users::delete_current_user))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    // Balance routes (protected)
    let balance_routes = Router::new()
        .route("/", get(handlers::users::get_balance))
        .route("/topup", post(handlers::users::request_topup))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    // Catalog routes (public reads, reviews attach here too)
    let product_routes = Router::new()
        .route("/", get(handlers::products::list_products))
        .route("/:id", get(handlers::products::get_product))
        .route("/:id/reviews", get(handlers::reviews::list_product_reviews))
        .merge(
            Router::new()
                .route("/:id/reviews", post(handlers::reviews::create_review))
                .layer(middleware::from_fn_with_state(state.clone(), auth_middleware)),
        );

    // Order routes (protected)
    let order_routes = Router::new()
        .route("/", post(handlers::orders::create_order))
        .route("/", get(handlers::orders::list_my_orders))
        .route("/:id", get(handlers::orders::get_order))
        .route("/:id/retry-payment", post(handlers::orders::retry_payment))
        .route("/:id/proof", post(handlers::orders::upload_proof))
        .route("/:id/apply-promo", post(handlers::orders::apply_promo))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    // Promo validation (protected)
    let promo_routes = Router::new()
        .route("/validate", post(handlers::promo::validate_promo))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    // Admin routes: auth then a fresh role check on every request
    let admin_routes = Router::new()
        .route("/orders", get(handlers::orders::admin_list_orders))
        .route("/orders/:id/status", put(handlers::orders::admin_update_order_status))
        .route("/orders/:id", delete(handlers::orders::admin_delete_order))
        .route("/products", post(handlers::products::create_product))
        .route("/products/:id", put(handlers::products::update_product))
        .route("/products/:id", delete(handlers::products::delete_product))
        .route("/promo-codes", get(handlers::promo::admin_list_promo_codes))
        .route("/promo-codes", post(handlers::promo::admin_create_promo_code))
        .route("/promo-codes/:id", put(handlers::promo::admin_update_promo_code))
        .route("/promo-codes/:id", delete(handlers::promo::admin_delete_promo_code))
        .route("/reviews/:id/approve", put(handlers::reviews::admin_approve_review))
        .route("/reviews/:id", delete(handlers::reviews::admin_delete_review))
        .route("/topups/:id", put(handlers::admin::resolve_topup))
        .route("/telegram-settings", get(handlers::admin::get_telegram_settings))
        .route("/telegram-settings", put(handlers::admin::update_telegram_settings))
        .route("/payment-details", put(handlers::admin::update_payment_details))
        .layer(middleware::from_fn_with_state(state.clone(), admin_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    // External callbacks (authenticated by signature / secret header)
    let webhook_routes = Router::new()
        .route("/payments/ozonpay/webhook", post(handlers::payments::ozonpay_webhook))
        .route("/telegram/webhook", post(handlers::telegram::telegram_webhook));

    // Combine all routes
    Router::new()
        .nest("/auth", auth_routes.merge(auth_protected))
        .nest("/users", user_routes)
        .nest("/balance", balance_routes)
        .nest("/products", product_routes)
        .nest("/orders", order_routes)
        .nest("/promo-codes", promo_routes)
        .nest("/admin", admin_routes)
        .route("/payment-details", get(handlers::admin::get_payment_details))
        .merge(webhook_routes)
        .with_state(state)
}
