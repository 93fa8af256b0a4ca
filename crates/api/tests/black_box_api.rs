use bizgate_api::{AppConfig, build_app};
use bizgate_infra::{BootstrapAdmin, InMemoryIdentityStore};
use chrono::Duration;
use reqwest::StatusCode;
use serde_json::{Value, json};

const ADMIN_EMAIL: &str = "admin@example.com";
const ADMIN_PASSWORD: &str = "admin-pass-123";

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        let config = AppConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            session_secret: "black-box-test-secret-at-least-32-bytes".to_string(),
            session_ttl: Duration::minutes(10),
            bootstrap_admin: Some(BootstrapAdmin::new(ADMIN_EMAIL, ADMIN_PASSWORD)),
            ..AppConfig::default()
        };

        // Same router as prod, bound to an ephemeral port.
        let app = build_app(&config, InMemoryIdentityStore::new())
            .await
            .expect("failed to build app");
        let listener = tokio::net::TcpListener::bind(&config.bind_addr)
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn login(client: &reqwest::Client, srv: &TestServer, email: &str, password: &str) -> Value {
    let res = client
        .post(srv.url("/auth/login"))
        .json(&json!({ "email": email, "password": password }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK, "login failed for {email}");
    res.json().await.unwrap()
}

async fn create(client: &reqwest::Client, srv: &TestServer, token: &str, path: &str, body: Value) -> String {
    let res = client
        .post(srv.url(path))
        .bearer_auth(token)
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED, "POST {path}");
    let body: Value = res.json().await.unwrap();
    body["id"].as_str().unwrap().to_string()
}

async fn put(client: &reqwest::Client, srv: &TestServer, token: &str, path: &str, body: Value) -> reqwest::Response {
    client
        .put(srv.url(path))
        .bearer_auth(token)
        .json(&body)
        .send()
        .await
        .unwrap()
}

async fn get_json(client: &reqwest::Client, srv: &TestServer, token: &str, path: &str) -> (StatusCode, Value) {
    let res = client.get(srv.url(path)).bearer_auth(token).send().await.unwrap();
    let status = res.status();
    let body = res.json().await.unwrap_or(Value::Null);
    (status, body)
}

fn names(body: &Value) -> Vec<String> {
    body["permissions"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p.as_str().unwrap().to_string())
        .collect()
}

struct Acme {
    admin_token: String,
    acme: String,
    jane: String,
}

/// Acme / Editor {ORDER_READ, ORDER_UPDATE} / Jane, built through the admin API.
async fn seed_acme(client: &reqwest::Client, srv: &TestServer) -> Acme {
    let admin = login(client, srv, ADMIN_EMAIL, ADMIN_PASSWORD).await;
    let token = admin["token"].as_str().unwrap().to_string();

    let acme = create(client, srv, &token, "/admin/organizations", json!({ "name": "Acme" })).await;
    let read = create(client, srv, &token, "/admin/permissions", json!({ "name": "ORDER_READ" })).await;
    let update = create(client, srv, &token, "/admin/permissions", json!({ "name": "ORDER_UPDATE" })).await;
    create(client, srv, &token, "/admin/permissions", json!({ "name": "ORDER_DELETE" })).await;
    let editor = create(client, srv, &token, "/admin/roles", json!({ "name": "Editor" })).await;
    let jane = create(
        client,
        srv,
        &token,
        "/admin/users",
        json!({ "display_name": "Jane", "email": "Jane@Example.com", "password": "jane-pass" }),
    )
    .await;

    let res = put(
        client,
        srv,
        &token,
        &format!("/admin/roles/{editor}/permissions"),
        json!({ "permission_ids": [read, update, read] }),
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);

    let res = put(
        client,
        srv,
        &token,
        &format!("/admin/users/{jane}/organizations"),
        json!({ "organization_ids": [acme] }),
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);

    let res = put(
        client,
        srv,
        &token,
        &format!("/admin/users/{jane}/organizations/{acme}/roles"),
        json!({ "role_ids": [editor] }),
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);

    Acme {
        admin_token: token,
        acme,
        jane,
    }
}

#[tokio::test]
async fn auth_required_for_protected_endpoints() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client.get(srv.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client.get(srv.url("/whoami")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .get(srv.url("/whoami"))
        .bearer_auth("not-a-token")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn login_rejects_bad_credentials() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    for (email, password) in [(ADMIN_EMAIL, "wrong"), ("nobody@example.com", ADMIN_PASSWORD)] {
        let res = client
            .post(srv.url("/auth/login"))
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }
}

#[tokio::test]
async fn editor_scenario_allows_and_denies_by_grant() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let acme = seed_acme(&client, &srv).await;

    // Organization defaults to Jane's only membership; email is case-insensitive.
    let session = login(&client, &srv, "jane@example.com", "jane-pass").await;
    assert_eq!(session["organization_id"].as_str().unwrap(), acme.acme);
    let jane_token = session["token"].as_str().unwrap().to_string();

    let (status, body) = get_json(&client, &srv, &jane_token, "/me/permissions").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(names(&body), vec!["ORDER_READ", "ORDER_UPDATE"]);
    assert_eq!(body["is_privileged"], json!(false));

    // Opaque 403: the body never names the missing permission.
    let res = client
        .get(srv.url("/admin/users"))
        .bearer_auth(&jane_token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    let body = res.text().await.unwrap();
    assert!(!body.contains("USER_READ"));

    let explain = |permission: &str| {
        format!(
            "/admin/rbac/explain/{}?permission={permission}&mode=any&organization_id={}",
            acme.jane, acme.acme
        )
    };
    let (status, body) = get_json(&client, &srv, &acme.admin_token, &explain("ORDER_DELETE")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["granted"], json!(false));

    let (_, body) = get_json(&client, &srv, &acme.admin_token, &explain("ORDER_READ")).await;
    assert_eq!(body["granted"], json!(true));

    // Explanations are for administrators only.
    let (status, _) = get_json(&client, &srv, &jane_token, &explain("ORDER_READ")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn revoking_grants_takes_effect_on_next_request() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let acme = seed_acme(&client, &srv).await;

    let session = login(&client, &srv, "jane@example.com", "jane-pass").await;
    let jane_token = session["token"].as_str().unwrap().to_string();

    let res = put(
        &client,
        &srv,
        &acme.admin_token,
        &format!("/admin/users/{}/organizations/{}/roles", acme.jane, acme.acme),
        json!({ "role_ids": [] }),
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);

    let (status, body) = get_json(&client, &srv, &jane_token, "/me/permissions").await;
    assert_eq!(status, StatusCode::OK);
    assert!(names(&body).is_empty());

    // Deleting the user invalidates the still-unexpired token.
    let res = client
        .delete(srv.url(&format!("/admin/users/{}", acme.jane)))
        .bearer_auth(&acme.admin_token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let (status, _) = get_json(&client, &srv, &jane_token, "/whoami").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn session_cookie_authenticates_and_switching_requires_membership() {
    let srv = TestServer::spawn().await;
    let admin_client = reqwest::Client::new();
    let acme = seed_acme(&admin_client, &srv).await;
    let globex = create(
        &admin_client,
        &srv,
        &acme.admin_token,
        "/admin/organizations",
        json!({ "name": "Globex" }),
    )
    .await;

    let client = reqwest::Client::builder().cookie_store(true).build().unwrap();
    let session = login(&client, &srv, "jane@example.com", "jane-pass").await;
    let expires_at = session["expires_at"].clone();

    let res = client.get(srv.url("/whoami")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["organization_id"].as_str().unwrap(), acme.acme);

    let res = client
        .post(srv.url("/session/organization"))
        .json(&json!({ "organization_id": globex }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = put(
        &admin_client,
        &srv,
        &acme.admin_token,
        &format!("/admin/users/{}/organizations", acme.jane),
        json!({ "organization_ids": [acme.acme, globex] }),
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);

    let res = client
        .post(srv.url("/session/organization"))
        .json(&json!({ "organization_id": globex }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let switched: Value = res.json().await.unwrap();
    assert_eq!(switched["organization_id"].as_str().unwrap(), globex);
    assert_eq!(switched["expires_at"], expires_at);

    // The re-issued cookie now scopes to Globex, where Jane holds no roles.
    let res = client.get(srv.url("/me/permissions")).send().await.unwrap();
    let body: Value = res.json().await.unwrap();
    assert!(names(&body).is_empty());

    let res = client.post(srv.url("/auth/logout")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
    let res = client.get(srv.url("/whoami")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn organization_header_overrides_scope_for_one_request() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let acme = seed_acme(&client, &srv).await;
    let session = login(&client, &srv, "jane@example.com", "jane-pass").await;
    let jane_token = session["token"].as_str().unwrap().to_string();

    let res = client
        .get(srv.url("/me/permissions"))
        .bearer_auth(&jane_token)
        .header("X-Organization-Id", "acme")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .get(srv.url("/me/permissions"))
        .bearer_auth(&jane_token)
        .header("X-Organization-Id", &acme.acme)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(names(&body), vec!["ORDER_READ", "ORDER_UPDATE"]);
}

#[tokio::test]
async fn store_errors_map_to_http_statuses() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let acme = seed_acme(&client, &srv).await;
    let token = &acme.admin_token;

    // Unknown role -> 404
    let (status, body) = get_json(
        &client,
        &srv,
        token,
        &format!("/admin/roles/{}", uuid_like()),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], json!("not_found"));

    // Duplicate organization name -> 409
    let res = client
        .post(srv.url("/admin/organizations"))
        .bearer_auth(token)
        .json(&json!({ "name": "Acme" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);

    // Grant in an organization the user does not belong to -> 422
    let other = create(&client, &srv, token, "/admin/organizations", json!({ "name": "Other" })).await;
    let role = create(&client, &srv, token, "/admin/roles", json!({ "name": "Viewer" })).await;
    let res = put(
        &client,
        &srv,
        token,
        &format!("/admin/users/{}/organizations/{other}/roles", acme.jane),
        json!({ "role_ids": [role] }),
    )
    .await;
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);

    // Blank name -> 400
    let res = client
        .post(srv.url("/admin/roles"))
        .bearer_auth(token)
        .json(&json!({ "name": "  " }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    // Unknown target in a replacement -> 404, and the prior set survives.
    let res = put(
        &client,
        &srv,
        token,
        &format!("/admin/users/{}/organizations", acme.jane),
        json!({ "organization_ids": [acme.acme, uuid_like()] }),
    )
    .await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let (_, body) = get_json(
        &client,
        &srv,
        token,
        &format!("/admin/users/{}/organizations", acme.jane),
    )
    .await;
    let orgs = body.as_array().unwrap();
    assert_eq!(orgs.len(), 1);
    assert_eq!(orgs[0]["id"].as_str().unwrap(), acme.acme);
}

/// Id of the entry named `name` in an admin listing.
async fn id_named(client: &reqwest::Client, srv: &TestServer, token: &str, path: &str, name: &str) -> String {
    let (status, body) = get_json(client, srv, token, path).await;
    assert_eq!(status, StatusCode::OK, "GET {path}");
    body.as_array()
        .unwrap()
        .iter()
        .find(|e| e["name"] == json!(name))
        .unwrap_or_else(|| panic!("{name} not in {path}"))["id"]
        .as_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn delegated_user_admin_is_confined_to_its_organization() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let acme = seed_acme(&client, &srv).await;
    let admin = &acme.admin_token;
    let globex = create(&client, &srv, admin, "/admin/organizations", json!({ "name": "Globex" })).await;

    // Jane administers users in Acme and may write roles, but is not privileged.
    let user_write = id_named(&client, &srv, admin, "/admin/permissions", "USER_WRITE").await;
    let role_write = id_named(&client, &srv, admin, "/admin/permissions", "ROLE_WRITE").await;
    let editor = id_named(&client, &srv, admin, "/admin/roles", "Editor").await;
    let super_admin = id_named(&client, &srv, admin, "/admin/roles", "Super Administrator").await;
    let delegate = create(&client, &srv, admin, "/admin/roles", json!({ "name": "Delegate" })).await;
    let res = put(
        &client,
        &srv,
        admin,
        &format!("/admin/roles/{delegate}/permissions"),
        json!({ "permission_ids": [user_write, role_write] }),
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);
    let res = put(
        &client,
        &srv,
        admin,
        &format!("/admin/users/{}/organizations/{}/roles", acme.jane, acme.acme),
        json!({ "role_ids": [delegate] }),
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);
    let bob = create(
        &client,
        &srv,
        admin,
        "/admin/users",
        json!({ "display_name": "Bob", "email": "bob@example.com", "password": "bob-pass" }),
    )
    .await;

    let session = login(&client, &srv, "jane@example.com", "jane-pass").await;
    let jane = session["token"].as_str().unwrap().to_string();

    // Within Acme the delegation works.
    let res = put(
        &client,
        &srv,
        &jane,
        &format!("/admin/users/{bob}/organizations"),
        json!({ "organization_ids": [acme.acme] }),
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);
    let res = put(
        &client,
        &srv,
        &jane,
        &format!("/admin/users/{bob}/organizations/{}/roles", acme.acme),
        json!({ "role_ids": [editor] }),
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);

    // Adding a membership in Globex needs USER_WRITE in Globex.
    for user in [&acme.jane, &bob] {
        let res = put(
            &client,
            &srv,
            &jane,
            &format!("/admin/users/{user}/organizations"),
            json!({ "organization_ids": [acme.acme, globex] }),
        )
        .await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
    }

    // Privileged roles and catalog writes need a privileged caller.
    let res = put(
        &client,
        &srv,
        &jane,
        &format!("/admin/users/{bob}/organizations/{}/roles", acme.acme),
        json!({ "role_ids": [super_admin] }),
    )
    .await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    let res = client
        .post(srv.url("/admin/roles"))
        .bearer_auth(&jane)
        .json(&json!({ "name": "Shadow" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    // A membership in Globex alone does not let Jane grant herself roles there.
    let res = put(
        &client,
        &srv,
        admin,
        &format!("/admin/users/{}/organizations", acme.jane),
        json!({ "organization_ids": [acme.acme, globex] }),
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);
    let res = put(
        &client,
        &srv,
        &jane,
        &format!("/admin/users/{}/organizations/{globex}/roles", acme.jane),
        json!({ "role_ids": [super_admin] }),
    )
    .await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let (_, grants) = get_json(
        &client,
        &srv,
        admin,
        &format!("/admin/users/{}/grants?organization_id={globex}", acme.jane),
    )
    .await;
    assert!(grants.as_array().unwrap().is_empty());
    let (_, bob_orgs) = get_json(&client, &srv, admin, &format!("/admin/users/{bob}/organizations")).await;
    assert_eq!(bob_orgs.as_array().unwrap().len(), 1);
}

fn uuid_like() -> String {
    bizgate_core::RoleId::new().to_string()
}
