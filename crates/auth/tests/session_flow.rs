use std::time::Duration;

use folio_auth::{AdminCredential, SessionRegistry, session_cookie};
use http::header;
use http::{HeaderMap, HeaderValue};

fn cookie_header(set_cookie: &str) -> HeaderMap {
    // A browser echoes back only the name=value part of Set-Cookie.
    let pair = set_cookie
        .split(';')
        .next()
        .expect("cookie must have a name=value pair");

    let mut headers = HeaderMap::new();
    headers.insert(
        header::COOKIE,
        HeaderValue::from_str(pair).expect("cookie pair must be a valid header"),
    );
    headers
}

#[tokio::test]
async fn login_cookie_authenticates_follow_up_requests() {
    let credential = AdminCredential::from_password("owner", "correct horse")
        .expect("credential should build");
    let registry = SessionRegistry::new(Duration::from_secs(3600), 8);

    assert!(!credential.verify("owner", "wrong"));
    assert_eq!(registry.active().await, 0);

    assert!(credential.verify("owner", "correct horse"));
    let issued = registry.issue(credential.username()).await;
    let set_cookie = session_cookie(&issued.token, issued.max_age, false);

    let identity = registry
        .authenticate(&cookie_header(&set_cookie))
        .await
        .expect("cookie should authenticate");
    assert_eq!(identity.username, "owner");
    assert_eq!(identity.session_id.len(), 12);

    registry.revoke(&issued.token).await;
    let err = registry
        .authenticate(&cookie_header(&set_cookie))
        .await
        .unwrap_err();
    assert_eq!(err.code, "ERR_AUTH_INVALID");
}

#[tokio::test]
async fn sessions_are_independent() {
    let registry = SessionRegistry::new(Duration::from_secs(3600), 8);
    let a = registry.issue("owner").await;
    let b = registry.issue("owner").await;

    assert_ne!(a.token, b.token);
    assert_ne!(a.identity.session_id, b.identity.session_id);

    registry.revoke(&a.token).await;
    assert!(registry.resolve(&b.token).await.is_some());
    assert_eq!(registry.active().await, 1);
}
