use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
    typed_header::TypedHeaderRejection,
};

use crate::{config::Config, error::AppError, utils::verify_token};

/// 管理接口鉴权：令牌无效返回 401，角色不是 admin 返回 403
pub async fn require_admin(
    State(config): State<Arc<Config>>,
    bearer: Result<TypedHeader<Authorization<Bearer>>, TypedHeaderRejection>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let TypedHeader(Authorization(bearer)) = bearer.map_err(|_| AppError::Unauthorized)?;

    let claims = verify_token(bearer.token(), &config).map_err(|e| {
        tracing::debug!("Rejected admin token: {}", e);
        AppError::Unauthorized
    })?;

    if !claims.is_admin() {
        tracing::warn!(user_id = %claims.sub, path = %req.uri().path(), "Non-admin access to admin route");
        return Err(AppError::Forbidden);
    }

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use axum::{
        Extension, Router,
        http::{StatusCode, header},
        middleware::from_fn_with_state,
        routing::get,
    };
    use tower::ServiceExt;

    use super::*;
    use crate::utils::{Claims, generate_token};

    fn app() -> Router {
        let config = Arc::new(Config::for_tests());
        Router::new()
            .route(
                "/admin",
                get(|Extension(claims): Extension<Claims>| async move { claims.sub }),
            )
            .layer(from_fn_with_state(config, require_admin))
    }

    fn request(token: Option<String>) -> Request<Body> {
        let mut builder = Request::builder().uri("/admin");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_missing_or_bad_token_is_unauthorized() {
        let response = app().oneshot(request(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app().oneshot(request(Some("garbage".into()))).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_role_is_checked() {
        let config = Config::for_tests();

        let (token, _) = generate_token("u1", "customer", &config).unwrap();
        let response = app().oneshot(request(Some(token))).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let (token, _) = generate_token("root", "admin", &config).unwrap();
        let response = app().oneshot(request(Some(token))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"root");
    }
}
