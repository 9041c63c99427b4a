use std::future::{ready, Ready};
use std::sync::{Mutex, MutexGuard};

use actix_web::{
    delete, dev::Payload, get, http::header, patch, post, put,
    web::{self, Data},
    FromRequest, HttpRequest, HttpResponse, Responder,
};
use serde_json::json;

use crate::{
    errors::AppError,
    structs::{
        CartListQuery, ItemListQuery, ItemPatch, ItemPost, PromoteQuery, RegisterUser, User,
        UserLookup, UserResponse, UserRole,
    },
    utils::{extract_basic_credentials, verify_password, CredentialError},
    AppState,
};

pub(crate) fn lock<T>(store: &Mutex<T>) -> Result<MutexGuard<'_, T>, AppError> {
    store.lock().map_err(|_| {
        log::error!("Store lock poisoned");
        AppError::InternalServerError
    })
}

/// Registers every handler plus the extractor configs that turn malformed
/// input into 422 responses.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default()
            .error_handler(|err, _req| AppError::Validation(err.to_string()).into()),
    )
    .app_data(
        web::QueryConfig::default()
            .error_handler(|err, _req| AppError::Validation(err.to_string()).into()),
    )
    .app_data(
        web::PathConfig::default()
            .error_handler(|err, _req| AppError::Validation(err.to_string()).into()),
    )
    .service(create_item_handler)
    .service(get_item_handler)
    .service(replace_item_handler)
    .service(patch_item_handler)
    .service(delete_item_handler)
    .service(list_items_handler)
    .service(create_cart_handler)
    .service(get_cart_handler)
    .service(add_to_cart_handler)
    .service(list_carts_handler)
    .service(register_user_handler)
    .service(get_user_handler)
    .service(promote_user_handler);
}

// --- Items ---

#[post("/item")]
pub async fn create_item_handler(
    state: Data<AppState>,
    web::Json(form): web::Json<ItemPost>,
) -> Result<impl Responder, AppError> {
    let item = lock(&state.items)?.create(form.name, form.price)?;
    Ok(HttpResponse::Created()
        .append_header((header::LOCATION, format!("/item/{}", item.id)))
        .json(item))
}

#[get("/item/{id}")]
pub async fn get_item_handler(
    state: Data<AppState>,
    id: web::Path<i64>,
) -> Result<impl Responder, AppError> {
    let item = lock(&state.items)?.get(id.into_inner())?;
    Ok(HttpResponse::Ok().json(item))
}

#[put("/item/{id}")]
pub async fn replace_item_handler(
    state: Data<AppState>,
    id: web::Path<i64>,
    web::Json(form): web::Json<ItemPost>,
) -> Result<impl Responder, AppError> {
    let item = lock(&state.items)?.replace(id.into_inner(), form.name, form.price)?;
    Ok(HttpResponse::Ok().json(item))
}

#[patch("/item/{id}")]
pub async fn patch_item_handler(
    state: Data<AppState>,
    id: web::Path<i64>,
    web::Json(patch): web::Json<ItemPatch>,
) -> Result<impl Responder, AppError> {
    let item = lock(&state.items)?.patch(id.into_inner(), patch)?;
    Ok(HttpResponse::Ok().json(item))
}

#[delete("/item/{id}")]
pub async fn delete_item_handler(
    state: Data<AppState>,
    id: web::Path<i64>,
) -> Result<impl Responder, AppError> {
    lock(&state.items)?.delete(id.into_inner())?;
    Ok(HttpResponse::Ok().json(json!({ "message": "Item deleted" })))
}

#[get("/item")]
pub async fn list_items_handler(
    state: Data<AppState>,
    query: web::Query<ItemListQuery>,
) -> Result<impl Responder, AppError> {
    let items = lock(&state.items)?.list(&query)?;
    Ok(HttpResponse::Ok().json(items))
}

// --- Carts ---

#[post("/cart")]
pub async fn create_cart_handler(state: Data<AppState>) -> Result<impl Responder, AppError> {
    let cart = lock(&state.carts)?.create();
    Ok(HttpResponse::Created()
        .append_header((header::LOCATION, format!("/cart/{}", cart.id)))
        .json(json!({ "id": cart.id })))
}

#[get("/cart/{id}")]
pub async fn get_cart_handler(
    state: Data<AppState>,
    id: web::Path<i64>,
) -> Result<impl Responder, AppError> {
    let cart = lock(&state.carts)?.get(id.into_inner())?;
    Ok(HttpResponse::Ok().json(cart))
}

#[post("/cart/{cart_id}/add/{item_id}")]
pub async fn add_to_cart_handler(
    state: Data<AppState>,
    path: web::Path<(i64, i64)>,
) -> Result<impl Responder, AppError> {
    let (cart_id, item_id) = path.into_inner();
    // items before carts, always
    let items = lock(&state.items)?;
    let cart = lock(&state.carts)?.add_item(cart_id, item_id, &items)?;
    Ok(HttpResponse::Ok().json(cart))
}

#[get("/cart")]
pub async fn list_carts_handler(
    state: Data<AppState>,
    query: web::Query<CartListQuery>,
) -> Result<impl Responder, AppError> {
    let carts = lock(&state.carts)?.list(&query)?;
    Ok(HttpResponse::Ok().json(carts))
}

// --- Users ---

/// A caller whose basic-auth credentials matched a stored user.
#[derive(Debug)]
pub struct AuthenticatedUser(pub User);

impl AuthenticatedUser {
    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.0.role == UserRole::Admin {
            Ok(())
        } else {
            log::warn!("User {} is not allowed to perform admin actions", self.0.uid);
            Err(AppError::Forbidden("admin role required".to_owned()))
        }
    }

    fn authenticate(req: &HttpRequest) -> Result<Self, AppError> {
        let credentials = extract_basic_credentials(req).map_err(|e| {
            log::warn!("Rejected request without usable credentials: {:?}", e);
            match e {
                CredentialError::Absent => AppError::Unauthorized("Not authenticated".to_owned()),
                CredentialError::Malformed => {
                    AppError::Unauthorized("Invalid authentication credentials".to_owned())
                }
            }
        })?;

        let state = req.app_data::<Data<AppState>>().ok_or_else(|| {
            log::error!("AppState is not registered");
            AppError::InternalServerError
        })?;
        let users = lock(&state.users)?;

        match users.find_by_username(&credentials.username) {
            Some(user) if verify_password(&credentials.password, &user.password) => {
                Ok(Self(user.clone()))
            }
            _ => {
                log::warn!("Invalid credentials for '{}'", credentials.username);
                Err(AppError::Unauthorized("Invalid credentials".to_owned()))
            }
        }
    }
}

impl FromRequest for AuthenticatedUser {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(Self::authenticate(req))
    }
}

/// An authenticated caller holding the admin role. Extracted before any
/// query or body, so non-admins are refused regardless of their parameters.
#[derive(Debug)]
pub struct AdminUser(pub User);

impl FromRequest for AdminUser {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(AuthenticatedUser::authenticate(req).and_then(|caller| {
            caller.require_admin()?;
            Ok(AdminUser(caller.0))
        }))
    }
}

#[post("/user-register")]
pub async fn register_user_handler(
    state: Data<AppState>,
    web::Json(form): web::Json<RegisterUser>,
) -> Result<impl Responder, AppError> {
    let user = lock(&state.users)?.register(form)?;
    Ok(HttpResponse::Ok().json(UserResponse::from(&user)))
}

#[post("/user-get")]
pub async fn get_user_handler(
    _caller: AuthenticatedUser,
    state: Data<AppState>,
    query: web::Query<UserLookup>,
) -> Result<impl Responder, AppError> {
    let user = lock(&state.users)?.get(&query)?;
    Ok(HttpResponse::Ok().json(UserResponse::from(&user)))
}

#[post("/user-promote")]
pub async fn promote_user_handler(
    caller: AdminUser,
    state: Data<AppState>,
    query: web::Query<PromoteQuery>,
) -> Result<impl Responder, AppError> {
    log::info!("Admin {} promotes user {}", caller.0.uid, query.id);
    let user = lock(&state.users)?.promote(query.id)?;
    Ok(HttpResponse::Ok().json(UserResponse::from(&user)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{build_state, config::AppConfig, structs::{Cart, Item}};
    use actix_web::{http::StatusCode, test, App};
    use base64::{engine::general_purpose, Engine as _};
    use serde_json::Value;

    const ADMIN: &str = "admin:superSecretAdminPassword123";

    fn basic(raw: &str) -> (header::HeaderName, String) {
        (
            header::AUTHORIZATION,
            format!("Basic {}", general_purpose::STANDARD.encode(raw)),
        )
    }

    macro_rules! app {
        () => {{
            let state = build_state(&AppConfig::default()).unwrap();
            test::init_service(App::new().app_data(state).configure(configure)).await
        }};
    }

    fn register_body(username: &str, password: &str) -> Value {
        json!({
            "username": username,
            "name": "Woopsen",
            "birthdate": "2001-02-03T04:05:06",
            "password": password,
        })
    }

    #[actix_web::test]
    async fn item_lifecycle() {
        let app = app!();

        let req = test::TestRequest::post()
            .uri("/item")
            .set_json(json!({"name": "tea", "price": 9.5}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert_eq!(resp.headers().get(header::LOCATION).unwrap(), "/item/0");
        let item: Item = test::read_body_json(resp).await;
        assert_eq!(item.name, "tea");
        assert_eq!(item.price, 9.5);

        let req = test::TestRequest::get().uri("/item/0").to_request();
        let fetched: Item = test::call_and_read_body_json(&app, req).await;
        assert_eq!(fetched, item);

        let req = test::TestRequest::put()
            .uri("/item/0")
            .set_json(json!({"name": "green tea", "price": 11.0}))
            .to_request();
        let replaced: Item = test::call_and_read_body_json(&app, req).await;
        assert_eq!(replaced.name, "green tea");

        let req = test::TestRequest::patch()
            .uri("/item/0")
            .set_json(json!({"price": 12.0}))
            .to_request();
        let patched: Item = test::call_and_read_body_json(&app, req).await;
        assert_eq!(patched.name, "green tea");
        assert_eq!(patched.price, 12.0);

        let req = test::TestRequest::patch()
            .uri("/item/0")
            .set_json(json!({"odd": 1}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

        for _ in 0..2 {
            let req = test::TestRequest::delete().uri("/item/0").to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::OK);
        }

        let req = test::TestRequest::get().uri("/item/0").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::patch()
            .uri("/item/0")
            .set_json(json!({"name": "x"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_MODIFIED);

        let req = test::TestRequest::put()
            .uri("/item/0")
            .set_json(json!({"name": "x", "price": 1.0}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::delete().uri("/item/5").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn item_creation_validates_input() {
        let app = app!();

        for body in [
            json!({"name": "tea", "price": 0}),
            json!({"name": "tea", "price": -1.5}),
            json!({"name": "tea"}),
        ] {
            let req = test::TestRequest::post().uri("/item").set_json(body).to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        }

        let req = test::TestRequest::get().uri("/item/abc").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[actix_web::test]
    async fn item_listing_filters_and_paginates() {
        let app = app!();
        for price in [5.0, 15.0, 25.0, 35.0] {
            let req = test::TestRequest::post()
                .uri("/item")
                .set_json(json!({"name": "thing", "price": price}))
                .to_request();
            test::call_service(&app, req).await;
        }
        let req = test::TestRequest::delete().uri("/item/1").to_request();
        test::call_service(&app, req).await;

        let req = test::TestRequest::get()
            .uri("/item?min_price=10&max_price=30")
            .to_request();
        let items: Vec<Item> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(items.iter().map(|i| i.id).collect::<Vec<_>>(), vec![2]);

        let req = test::TestRequest::get()
            .uri("/item?min_price=10&max_price=30&show_deleted=true")
            .to_request();
        let items: Vec<Item> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(items.iter().map(|i| i.id).collect::<Vec<_>>(), vec![1, 2]);

        let req = test::TestRequest::get().uri("/item?offset=1&limit=2").to_request();
        let items: Vec<Item> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(items.iter().map(|i| i.id).collect::<Vec<_>>(), vec![2, 3]);

        for uri in [
            "/item?limit=0",
            "/item?offset=-1",
            "/item?max_price=-2",
            "/item?limit=x",
            "/item?min_price=NaN",
        ] {
            let req = test::TestRequest::get().uri(uri).to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY, "{uri}");
        }
    }

    #[actix_web::test]
    async fn cart_accumulates_items() {
        let app = app!();

        let req = test::TestRequest::post()
            .uri("/item")
            .set_json(json!({"name": "tea", "price": 3.0}))
            .to_request();
        test::call_service(&app, req).await;

        let req = test::TestRequest::post().uri("/cart").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert_eq!(resp.headers().get(header::LOCATION).unwrap(), "/cart/0");
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body, json!({"id": 0}));

        for _ in 0..2 {
            let req = test::TestRequest::post().uri("/cart/0/add/0").to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::OK);
        }

        let req = test::TestRequest::get().uri("/cart/0").to_request();
        let cart: Cart = test::call_and_read_body_json(&app, req).await;
        assert_eq!(cart.items.len(), 1);
        assert_eq!(cart.items[0].quantity, 2);
        assert_eq!(cart.price, 6.0);

        for uri in ["/cart/9/add/0", "/cart/0/add/9"] {
            let req = test::TestRequest::post().uri(uri).to_request();
            assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
        }
        let req = test::TestRequest::get().uri("/cart/9").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::post().uri("/cart").to_request();
        test::call_service(&app, req).await;

        let req = test::TestRequest::get().uri("/cart?min_quantity=1").to_request();
        let carts: Vec<Cart> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(carts.iter().map(|c| c.id).collect::<Vec<_>>(), vec![0]);

        let req = test::TestRequest::get().uri("/cart?max_price=1").to_request();
        let carts: Vec<Cart> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(carts.iter().map(|c| c.id).collect::<Vec<_>>(), vec![1]);

        let req = test::TestRequest::get().uri("/cart?max_quantity=-1").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[actix_web::test]
    async fn registration_rules() {
        let app = app!();

        let req = test::TestRequest::post()
            .uri("/user-register")
            .set_json(register_body("user_woopsen", "strongpassword123"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let user: UserResponse = test::read_body_json(resp).await;
        assert_eq!(user.username, "user_woopsen");
        assert_eq!(user.role, UserRole::User);
        assert_eq!(user.birthdate, "2001-02-03T04:05:06");

        for (username, birthdate) in [("dated", "2001-02-03"), ("zoned", "2001-02-03T04:05:06Z")] {
            let mut body = register_body(username, "strongpassword123");
            body["birthdate"] = json!(birthdate);
            let req = test::TestRequest::post()
                .uri("/user-register")
                .set_json(body)
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::OK, "{birthdate}");
            let user: UserResponse = test::read_body_json(resp).await;
            assert_eq!(user.birthdate, birthdate);
        }

        let mut body = register_body("undated", "strongpassword123");
        body["birthdate"] = json!("not a date");
        let req = test::TestRequest::post()
            .uri("/user-register")
            .set_json(body)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

        for (username, password) in [
            ("user_woopsen", "strongpassword123"),
            ("other", "short123"),
            ("other", "password_without_number"),
        ] {
            let req = test::TestRequest::post()
                .uri("/user-register")
                .set_json(register_body(username, password))
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{username}/{password}");
        }
    }

    #[actix_web::test]
    async fn user_get_requires_credentials_and_one_key() {
        let app = app!();
        let req = test::TestRequest::post()
            .uri("/user-register")
            .set_json(register_body("bob", "strongpassword123"))
            .to_request();
        let bob: UserResponse = test::call_and_read_body_json(&app, req).await;

        let req = test::TestRequest::post()
            .uri(&format!("/user-get?id={}", bob.uid))
            .insert_header(basic(ADMIN))
            .to_request();
        let fetched: UserResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(fetched, bob);

        let req = test::TestRequest::post()
            .uri("/user-get?username=bob")
            .insert_header(basic("bob:strongpassword123"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let cases = [
            (format!("/user-get?id={}&username=bob", bob.uid), StatusCode::BAD_REQUEST),
            ("/user-get".to_owned(), StatusCode::BAD_REQUEST),
            ("/user-get?username=unknown".to_owned(), StatusCode::NOT_FOUND),
            ("/user-get?username=".to_owned(), StatusCode::NOT_FOUND),
            ("/user-get?id=4242".to_owned(), StatusCode::NOT_FOUND),
        ];
        for (uri, status) in cases {
            let req = test::TestRequest::post()
                .uri(&uri)
                .insert_header(basic(ADMIN))
                .to_request();
            assert_eq!(test::call_service(&app, req).await.status(), status, "{uri}");
        }

        for creds in ["admin:wrongpassword", "invalid_user:strongpassword123"] {
            let req = test::TestRequest::post()
                .uri(&format!("/user-get?id={}", bob.uid))
                .insert_header(basic(creds))
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "{creds}");
        }

        let req = test::TestRequest::post()
            .uri(&format!("/user-get?id={}", bob.uid))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(resp.headers().contains_key(header::WWW_AUTHENTICATE));
    }

    #[actix_web::test]
    async fn promotion_is_admin_only() {
        let app = app!();
        let req = test::TestRequest::post()
            .uri("/user-register")
            .set_json(register_body("bob", "strongpassword123"))
            .to_request();
        let bob: UserResponse = test::call_and_read_body_json(&app, req).await;

        let req = test::TestRequest::post()
            .uri(&format!("/user-promote?id={}", bob.uid))
            .insert_header(basic("bob:strongpassword123"))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

        for uri in ["/user-promote", "/user-promote?id=abc"] {
            let req = test::TestRequest::post()
                .uri(uri)
                .insert_header(basic("bob:strongpassword123"))
                .to_request();
            assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN, "{uri}");
        }

        let req = test::TestRequest::post()
            .uri("/user-promote")
            .insert_header(basic(ADMIN))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let req = test::TestRequest::post()
            .uri("/user-promote?id=5000")
            .insert_header(basic(ADMIN))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::post()
            .uri(&format!("/user-promote?id={}", bob.uid))
            .insert_header(basic(ADMIN))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        let req = test::TestRequest::post()
            .uri(&format!("/user-get?id={}", bob.uid))
            .insert_header(basic(ADMIN))
            .to_request();
        let fetched: UserResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(fetched.role, UserRole::Admin);

        // bob can now promote others
        let req = test::TestRequest::post()
            .uri("/user-promote?id=1")
            .insert_header(basic("bob:strongpassword123"))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
    }
}
