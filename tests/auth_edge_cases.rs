mod common;

use std::sync::Arc;

use anyhow::Result;
use axum::http::StatusCode;
use serde_json::json;

#[tokio::test]
async fn auth_edge_cases() -> Result<()> {
    let t = common::spawn_app().await?;

    // 1. Register with short password
    let (status, _) = t
        .send(
            "POST",
            "/auth/register",
            None,
            Some(json!({ "name": "Short Pass", "email": "short@example.com", "password": "short" })),
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST, "Should fail with bad request for short password");

    // 2. Register with valid user; role and status take their defaults
    let (status, body) = t
        .send(
            "POST",
            "/auth/register",
            None,
            Some(json!({ "name": "Valid User", "email": "Valid@Example.com", "password": "password123" })),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["user"]["role"], "user");
    assert_eq!(body["user"]["status"], "active");
    assert_eq!(body["user"]["email"], "valid@example.com");

    // 3. Duplicate email, any case
    let (status, _) = t
        .send(
            "POST",
            "/auth/register",
            None,
            Some(json!({ "name": "Again", "email": "VALID@example.com", "password": "password123" })),
        )
        .await?;
    assert_eq!(status, StatusCode::CONFLICT);

    // 4. Login with wrong password
    let (status, _) = t
        .send(
            "POST",
            "/auth/login",
            None,
            Some(json!({ "email": "valid@example.com", "password": "wrongpassword" })),
        )
        .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED, "Should fail with unauthorized for wrong password");

    // 5. Login with non-existent email
    let (status, _) = t
        .send(
            "POST",
            "/auth/login",
            None,
            Some(json!({ "email": "nobody@example.com", "password": "password123" })),
        )
        .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED, "Should fail with unauthorized for non-existent user");

    // 6. Access protected route without token, and with garbage
    let (status, body) = t.send("GET", "/auth/me", None, None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED, "Should fail with unauthorized for missing token");
    assert_eq!(body["error"], "unauthorized");
    let (status, _) = t.send("GET", "/auth/me", Some("not-a-jwt"), None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // 7. Successful login stamps last_login
    let (status, body) = t
        .send(
            "POST",
            "/auth/login",
            None,
            Some(json!({ "email": "valid@example.com", "password": "password123" })),
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert!(body["user"]["last_login"].is_string());
    let token = body["token"].as_str().unwrap().to_string();

    let (status, me) = t.send("GET", "/auth/me", Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["name"], "Valid User");

    Ok(())
}

#[tokio::test]
async fn malformed_body_reports_field_path() -> Result<()> {
    let t = common::spawn_app().await?;
    let (token, _) = t.register("Reporter", "reporter@example.com").await?;

    let mut pet = common::pet_body("Max", "lost", "Beagle");
    pet["coordinates"]["lat"] = json!("north");
    let (status, body) = t.send("POST", "/pets", Some(&token), Some(pet)).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("coordinates.lat"), "{body}");

    let mut pet = common::pet_body("Max", "lost", "Beagle");
    pet["status"] = json!("missing");
    let (status, _) = t.send("POST", "/pets", Some(&token), Some(pet)).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    Ok(())
}

#[tokio::test]
async fn blocked_account_cannot_login_or_use_token() -> Result<()> {
    let t = common::spawn_app().await?;
    let (token, id) = t.register("Soon Blocked", "blocked@example.com").await?;

    sqlx::query("UPDATE users SET status = 'blocked' WHERE id = ?")
        .bind(&id)
        .execute(&t.pool)
        .await?;

    let (status, body) = t
        .send(
            "POST",
            "/auth/login",
            None,
            Some(json!({ "email": "blocked@example.com", "password": "password123" })),
        )
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");

    let (status, _) = t.send("GET", "/auth/me", Some(&token), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    Ok(())
}

#[tokio::test]
async fn permissions_follow_role_changes_immediately() -> Result<()> {
    let t = common::spawn_app().await?;
    let (token, id) = t.register("Promoted", "promoted@example.com").await?;

    let (status, body) = t.send("GET", "/auth/permissions", Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["role"], "user");
    let audit = body["permissions"]
        .as_array()
        .unwrap()
        .iter()
        .find(|p| p["resource"] == "audit_logs")
        .unwrap();
    assert_eq!(audit["actions"], json!([]));
    assert_eq!(body["permissions"][1], json!({ "resource": "pets", "actions": ["create", "read", "update"] }));

    sqlx::query("UPDATE users SET role = 'moderator' WHERE id = ?")
        .bind(&id)
        .execute(&t.pool)
        .await?;

    // same token, new role
    let (_, body) = t.send("GET", "/auth/permissions", Some(&token), None).await?;
    assert_eq!(body["role"], "moderator");
    assert_eq!(
        body["permissions"][1],
        json!({ "resource": "pets", "actions": ["read", "update", "block", "unblock"] })
    );

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_registrations_with_one_email_create_one_account() -> Result<()> {
    let t = Arc::new(common::spawn_app().await?);

    let mut handles = Vec::new();
    for i in 0..8 {
        let t = Arc::clone(&t);
        handles.push(tokio::spawn(async move {
            let body = json!({ "name": format!("Racer {i}"), "email": "race@example.com", "password": "password123" });
            let (status, _) = t.send("POST", "/auth/register", None, Some(body)).await?;
            anyhow::Ok(status)
        }));
    }

    let mut created = 0;
    for handle in handles {
        let status = handle.await??;
        if status == StatusCode::CREATED {
            created += 1;
        } else {
            assert_eq!(status, StatusCode::CONFLICT);
        }
    }
    assert_eq!(created, 1);

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM users WHERE email = 'race@example.com'")
        .fetch_one(&t.pool)
        .await?;
    assert_eq!(rows, 1);

    let (status, _) = t
        .send(
            "POST",
            "/auth/login",
            None,
            Some(json!({ "email": "race@example.com", "password": "password123" })),
        )
        .await?;
    assert_eq!(status, StatusCode::OK);

    Ok(())
}

#[tokio::test]
async fn deleted_account_releases_its_email() -> Result<()> {
    let t = common::spawn_app().await?;
    let (admin, _) = t.register_with_role("Adam Admin", "admin@example.com", "admin").await?;
    let (_, user_id) = t.register("Gone Soon", "gone@example.com").await?;

    let (status, _) = t.send("DELETE", &format!("/users/{user_id}"), Some(&admin), None).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, new_id) = t.register("Back Again", "gone@example.com").await?;
    assert_ne!(new_id, user_id);

    Ok(())
}
