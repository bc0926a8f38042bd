use crate::errors::GatewayError;
use crate::metrics;
use crate::models::{
    AccountResponse, CreateAccountRequest, CreateInvoiceRequest, InvoiceResponse,
};
use crate::services::{AccountService, InvoiceService};
use actix_web::dev::Payload;
use actix_web::{web, FromRequest, HttpRequest, HttpResponse};
use serde_json::json;
use std::future::{ready, Ready};
use std::sync::Arc;
use uuid::Uuid;

pub const API_KEY_HEADER: &str = "X-API-KEY";

/// Merchant API key taken from the `X-API-KEY` header
#[derive(Debug, Clone)]
pub struct ApiKey(pub String);

/// Blank keys and the literal strings `undefined` / `null` count as missing.
fn normalize_api_key(raw: &str) -> Option<String> {
    let key = raw.trim();
    match key {
        "" | "undefined" | "null" => None,
        _ => Some(key.to_string()),
    }
}

impl FromRequest for ApiKey {
    type Error = GatewayError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let key = req
            .headers()
            .get(API_KEY_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(normalize_api_key);

        ready(key.map(ApiKey).ok_or(GatewayError::MissingApiKey))
    }
}

/// Health check endpoint
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "service": "payment-gateway",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

pub async fn create_account(
    service: web::Data<Arc<AccountService>>,
    request: web::Json<CreateAccountRequest>,
) -> Result<HttpResponse, GatewayError> {
    let account = service.create_account(request.into_inner()).await?;
    Ok(HttpResponse::Created().json(AccountResponse::with_api_key(account)))
}

pub async fn get_account(
    service: web::Data<Arc<AccountService>>,
    api_key: ApiKey,
) -> Result<HttpResponse, GatewayError> {
    let account = service.find_by_api_key(&api_key.0).await?;
    Ok(HttpResponse::Ok().json(AccountResponse::from(account)))
}

pub async fn create_invoice(
    service: web::Data<Arc<InvoiceService>>,
    api_key: ApiKey,
    request: web::Json<CreateInvoiceRequest>,
) -> Result<HttpResponse, GatewayError> {
    let invoice = service
        .create_invoice(&api_key.0, request.into_inner())
        .await?;
    Ok(HttpResponse::Created().json(InvoiceResponse::from(invoice)))
}

pub async fn list_invoices(
    service: web::Data<Arc<InvoiceService>>,
    api_key: ApiKey,
) -> Result<HttpResponse, GatewayError> {
    let invoices: Vec<InvoiceResponse> = service
        .list_invoices_by_api_key(&api_key.0)
        .await?
        .into_iter()
        .map(InvoiceResponse::from)
        .collect();
    Ok(HttpResponse::Ok().json(invoices))
}

pub async fn get_invoice(
    service: web::Data<Arc<InvoiceService>>,
    api_key: ApiKey,
    invoice_id: web::Path<Uuid>,
) -> Result<HttpResponse, GatewayError> {
    let invoice = service.get_invoice(*invoice_id, &api_key.0).await?;
    Ok(HttpResponse::Ok().json(InvoiceResponse::from(invoice)))
}

/// Prometheus metrics endpoint
pub async fn metrics_endpoint() -> HttpResponse {
    match metrics::metrics_handler() {
        Ok(body) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(body),
        Err(e) => HttpResponse::InternalServerError().json(json!({
            "error": "Failed to gather metrics",
            "details": e.to_string()
        })),
    }
}

/// Configure routes
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/accounts")
            .route("", web::post().to(create_account))
            .route("", web::get().to(get_account)),
    )
    .service(
        web::scope("/invoices")
            .route("", web::post().to(create_invoice))
            .route("", web::get().to(list_invoices))
            .route("/{id}", web::get().to(get_invoice)),
    )
    .route("/metrics", web::get().to(metrics_endpoint))
    .route("/health", web::get().to(health_check));
}
