mod common;

use anyhow::Result;
use axum::http::StatusCode;
use serde_json::json;

#[tokio::test]
async fn admin_provisions_and_manages_accounts() -> Result<()> {
    let t = common::spawn_app().await?;
    let (admin, admin_id) = t.register_with_role("Adam Admin", "admin@example.com", "admin").await?;
    let (moderator, _) = t.register_with_role("Mona Mod", "mod@example.com", "moderator").await?;
    let (user, user_id) = t.register("Uma User", "uma@example.com").await?;

    let new_account = json!({
        "name": "Grace Hopper",
        "email": "grace@example.com",
        "password": "password123",
        "role": "moderator"
    });
    let (status, _) = t.send("POST", "/users", Some(&user), Some(new_account.clone())).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = t.send("POST", "/users", Some(&moderator), Some(new_account.clone())).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, grace) = t.send("POST", "/users", Some(&admin), Some(new_account)).await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(grace["role"], "moderator");

    let (status, list) = t.send("GET", "/users?role=moderator", Some(&admin), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 2);

    let (_, list) = t.send("GET", "/users?q=UMA", Some(&moderator), None).await?;
    assert_eq!(list.as_array().unwrap().len(), 1);
    assert_eq!(list[0]["id"], user_id.as_str());

    // `%` is a literal character, not a match-everything wildcard
    let (_, list) = t.send("GET", "/users?q=%25", Some(&moderator), None).await?;
    assert_eq!(list.as_array().unwrap().len(), 0);

    // moderators may look but not block
    let (status, _) = t.send("POST", &format!("/users/{user_id}/block"), Some(&moderator), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = t.send("POST", &format!("/users/{user_id}/block"), Some(&admin), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "blocked");

    let (_, list) = t.send("GET", "/users?status=blocked", Some(&admin), None).await?;
    assert_eq!(list.as_array().unwrap().len(), 1);

    let (status, _) = t.send("GET", "/auth/me", Some(&user), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = t.send("POST", &format!("/users/{user_id}/unblock"), Some(&admin), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "active");
    let (status, _) = t.send("GET", "/auth/me", Some(&user), None).await?;
    assert_eq!(status, StatusCode::OK);

    // no self-block or self-delete
    let (status, _) = t.send("POST", &format!("/users/{admin_id}/block"), Some(&admin), None).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = t.send("DELETE", &format!("/users/{admin_id}"), Some(&admin), None).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = t.send("DELETE", &format!("/users/{user_id}"), Some(&moderator), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = t.send("DELETE", &format!("/users/{user_id}"), Some(&admin), None).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = t.send("GET", &format!("/users/{user_id}"), Some(&admin), None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    // the deleted account's token no longer resolves
    let (status, _) = t.send("GET", "/auth/me", Some(&user), None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    Ok(())
}

#[tokio::test]
async fn profile_updates_are_scoped_and_role_changes_need_admin() -> Result<()> {
    let t = common::spawn_app().await?;
    let (admin, _) = t.register_with_role("Adam Admin", "admin@example.com", "admin").await?;
    let (alice, alice_id) = t.register("Alice", "alice@example.com").await?;
    let (bob, bob_id) = t.register("Bob", "bob@example.com").await?;

    let (status, body) = t
        .send("PUT", &format!("/users/{alice_id}"), Some(&alice), Some(json!({ "name": "Alice Liddell" })))
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "Alice Liddell");

    let (status, _) = t
        .send("PUT", &format!("/users/{bob_id}"), Some(&alice), Some(json!({ "name": "Hacked" })))
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = t
        .send("PUT", &format!("/users/{alice_id}"), Some(&alice), Some(json!({ "role": "admin" })))
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = t
        .send("PUT", &format!("/users/{bob_id}"), Some(&admin), Some(json!({ "role": "moderator" })))
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["role"], "moderator");

    let (_, body) = t.send("GET", "/auth/permissions", Some(&bob), None).await?;
    assert_eq!(body["role"], "moderator");

    let (status, _) = t
        .send("PUT", &format!("/users/{bob_id}"), Some(&admin), Some(json!({ "role": "root" })))
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    Ok(())
}
