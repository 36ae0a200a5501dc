mod common;

use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde_json::{Value, json};

use rbac_auth::Operation;

use common::{ADMIN, ADMIN_PASSWORD, SECRET, TestServer};

fn mint_jwt(secret: &str, username: &str, issued_hours_ago: i64) -> String {
    let iat = Utc::now() - ChronoDuration::hours(issued_hours_ago);
    let claims = json!({
        "username": username,
        "roles": ["admin"],
        "iat": iat.timestamp(),
        "exp": (iat + ChronoDuration::hours(2)).timestamp(),
    });
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("failed to encode jwt")
}

async fn login(client: &reqwest::Client, srv: &TestServer, username: &str, password: &str) -> String {
    let res = client
        .post(srv.url("/v1/login"))
        .json(&json!({ "username": username, "password": password }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    body["token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn auth_required_for_protected_endpoints() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client.get(srv.url("/v1/users")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let text = res.text().await.unwrap();
    assert!(text.starts_with("Unauthorized"), "{text}");

    let res = client
        .get(srv.url("/v1/users"))
        .header("authorization", "Token abc")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn public_paths_need_no_token() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client.get(srv.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "SERVING");

    login(&client, &srv, ADMIN, ADMIN_PASSWORD).await;
}

#[tokio::test]
async fn forged_and_expired_tokens_are_rejected() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    for token in [
        mint_jwt("some-other-secret", ADMIN, 0),
        mint_jwt(SECRET, ADMIN, 3),
        "not.a.jwt".to_string(),
    ] {
        let res = client
            .get(srv.url("/v1/whoami"))
            .bearer_auth(token)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    let res = client
        .get(srv.url("/v1/whoami"))
        .bearer_auth(mint_jwt(SECRET, ADMIN, 0))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn login_failures_do_not_reveal_usernames() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let mut bodies = Vec::new();
    for (username, password) in [("nobody", "x"), (ADMIN, "wrong")] {
        let res = client
            .post(srv.url("/v1/login"))
            .json(&json!({ "username": username, "password": password }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        bodies.push(res.json::<Value>().await.unwrap());
    }
    assert_eq!(bodies[0], bodies[1]);
}

#[tokio::test]
async fn register_requires_default_role_then_succeeds() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let register = json!({ "username": "alice", "password": "pw" });

    let res = client
        .post(srv.url("/v1/register"))
        .json(&register)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::PRECONDITION_FAILED);

    let admin = login(&client, &srv, ADMIN, ADMIN_PASSWORD).await;
    let res = client
        .post(srv.url("/v1/roles"))
        .bearer_auth(&admin)
        .json(&json!({ "name": "user", "description": "default" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);

    let res = client
        .post(srv.url("/v1/register"))
        .json(&register)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);

    let res = client
        .post(srv.url("/v1/register"))
        .json(&register)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "conflict");

    let token = login(&client, &srv, "alice", "pw").await;
    let res = client
        .get(srv.url("/v1/whoami"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["username"], "alice");
    assert_eq!(body["roles"], json!(["user"]));
}

#[tokio::test]
async fn editor_scenario_over_http() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let admin = login(&client, &srv, ADMIN, ADMIN_PASSWORD).await;

    let res = client
        .post(srv.url("/v1/users"))
        .bearer_auth(&admin)
        .json(&json!({ "username": "alice", "password": "pw" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let alice = res.json::<Value>().await.unwrap()["user_id"].as_i64().unwrap();

    let res = client
        .post(srv.url("/v1/roles"))
        .bearer_auth(&admin)
        .json(&json!({ "name": "editor" }))
        .send()
        .await
        .unwrap();
    let editor = res.json::<Value>().await.unwrap()["role_id"].as_i64().unwrap();

    let res = client
        .get(srv.url("/v1/permissions"))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    let listed: Value = res.json().await.unwrap();
    let write = listed["permissions"]
        .as_array()
        .unwrap()
        .iter()
        .find(|p| p["name"] == "write")
        .unwrap()["id"]
        .as_i64()
        .unwrap();

    let res = client
        .put(srv.url(&format!("/v1/roles/{editor}/permissions")))
        .bearer_auth(&admin)
        .json(&json!({ "permission_ids": [write] }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client
        .put(srv.url(&format!("/v1/users/{alice}/roles")))
        .bearer_auth(&admin)
        .json(&json!({ "role_ids": [editor] }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    for (permission, expected) in [("write", true), ("delete", false)] {
        let res = client
            .post(srv.url("/v1/check-permission"))
            .bearer_auth(&admin)
            .json(&json!({ "user_id": alice, "permission": permission }))
            .send()
            .await
            .unwrap();
        let body: Value = res.json().await.unwrap();
        assert_eq!(body["allowed"], expected, "{permission}");
    }

    let res = client
        .get(srv.url(&format!("/v1/roles/{editor}/permissions")))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["permissions"][0]["name"], "write");

    let res = client
        .get(srv.url("/v1/user-roles/alice"))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["roles"], json!(["editor"]));
}

#[tokio::test]
async fn user_crud_and_permission_soft_delete() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let admin = login(&client, &srv, ADMIN, ADMIN_PASSWORD).await;

    let res = client
        .post(srv.url("/v1/users"))
        .bearer_auth(&admin)
        .json(&json!({ "username": "bob", "password": "pw" }))
        .send()
        .await
        .unwrap();
    let bob = res.json::<Value>().await.unwrap()["user_id"].as_i64().unwrap();

    let res = client
        .put(srv.url(&format!("/v1/users/{bob}")))
        .bearer_auth(&admin)
        .json(&json!({ "username": "robert" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    login(&client, &srv, "robert", "pw").await;

    let res = client
        .put(srv.url(&format!("/v1/users/{bob}")))
        .bearer_auth(&admin)
        .json(&json!({ "username": ADMIN }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);

    let res = client
        .get(srv.url(&format!("/v1/users/{bob}")))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["username"], "robert");

    let res = client
        .delete(srv.url(&format!("/v1/users/{bob}")))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client
        .delete(srv.url(&format!("/v1/users/{bob}")))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client
        .post(srv.url("/v1/permissions"))
        .bearer_auth(&admin)
        .json(&json!({ "name": "publish", "description": "publish posts" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let publish = res.json::<Value>().await.unwrap()["id"].as_i64().unwrap();

    let res = client
        .delete(srv.url(&format!("/v1/permissions/{publish}")))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client
        .get(srv.url("/v1/permissions"))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    let body: Value = res.json().await.unwrap();
    assert!(
        body["permissions"]
            .as_array()
            .unwrap()
            .iter()
            .all(|p| p["name"] != "publish")
    );

    let res = client
        .post(srv.url("/v1/permissions"))
        .bearer_auth(&admin)
        .json(&json!({ "name": "publish" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn malformed_input_is_bad_request() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let admin = login(&client, &srv, ADMIN, ADMIN_PASSWORD).await;

    let res = client
        .get(srv.url("/v1/users/not-a-number"))
        .bearer_auth(&admin)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .post(srv.url("/v1/roles"))
        .bearer_auth(&admin)
        .json(&json!({ "title": "editor" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid");
}

#[tokio::test]
async fn admin_permission_guard_returns_forbidden() {
    let srv = TestServer::spawn_with(Some("write")).await;
    let client = reqwest::Client::new();
    let admin = login(&client, &srv, ADMIN, ADMIN_PASSWORD).await;

    let res = client
        .post(srv.url("/v1/users"))
        .bearer_auth(&admin)
        .json(&json!({ "username": "carol", "password": "pw" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);

    let carol = login(&client, &srv, "carol", "pw").await;
    let res = client
        .post(srv.url("/v1/roles"))
        .bearer_auth(&carol)
        .json(&json!({ "name": "sneaky" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    // Authenticated but unprivileged callers can still read.
    let res = client
        .get(srv.url("/v1/users"))
        .bearer_auth(&carol)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn every_operation_route_is_served() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let token = login(&client, &srv, ADMIN, ADMIN_PASSWORD).await;

    for op in Operation::ALL {
        let route = op.http_route();
        let path = route
            .path
            .replace("{username}", "nobody")
            .replace("{id}", "999999");
        let method = reqwest::Method::from_bytes(route.method.as_bytes()).unwrap();

        let mut req = client
            .request(method.clone(), srv.url(&path))
            .bearer_auth(&token);
        if method == reqwest::Method::POST || method == reqwest::Method::PUT {
            req = req.json(&json!({}));
        }
        let res = req.send().await.unwrap();
        let status = res.status();

        assert_ne!(status, StatusCode::METHOD_NOT_ALLOWED, "{op}: {method} {path}");
        if status == StatusCode::NOT_FOUND {
            // A matched handler reports a missing entity as JSON; the router's
            // own fallback has an empty body.
            let body: Value = res.json().await.unwrap_or(Value::Null);
            assert_eq!(body["error"], "not_found", "{op}: {method} {path} is not routed");
        }
    }
}
