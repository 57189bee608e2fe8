#![allow(dead_code)]

use std::time::Duration;

use anyhow::{Context, Result};
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tempfile::TempDir;
use tower::util::ServiceExt; // for `oneshot`

use petconnect::{create_app, db};

/// Router over a fresh migrated database. Keep the `TempDir` alive for the test's duration.
pub struct TestApp {
    pub dir: TempDir,
    pub pool: SqlitePool,
    pub app: Router,
}

pub async fn spawn_app() -> Result<TestApp> {
    let dir = tempfile::tempdir().context("failed to create tempdir")?;
    let db_path = dir.path().join("test.db");

    // same pool settings as the server (WAL, busy timeout, foreign keys)
    let pool = db::connect(&format!("sqlite://{}", db_path.display())).await?;

    let migrator =
        sqlx::migrate::Migrator::new(std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")).await?;
    migrator.run(&pool).await?;

    std::env::set_var("JWT_SECRET", "test-secret");
    let app = create_app(pool.clone()).await?;

    Ok(TestApp { dir, pool, app })
}

impl TestApp {
    pub async fn send(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Result<(StatusCode, Value)> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let req = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))?,
            None => builder.body(Body::empty())?,
        };

        let resp = self.app.clone().oneshot(req).await?;
        let status = resp.status();
        let bytes = body::to_bytes(resp.into_body(), 10_485_760).await?;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };

        Ok((status, value))
    }

    /// Registers an account and returns `(token, user id)`.
    pub async fn register(&self, name: &str, email: &str) -> Result<(String, String)> {
        let (status, body) = self
            .send(
                "POST",
                "/auth/register",
                None,
                Some(json!({ "name": name, "email": email, "password": "password123" })),
            )
            .await?;
        assert_eq!(status, StatusCode::CREATED, "register {email}: {body}");

        let token = body["token"].as_str().context("token missing")?.to_string();
        let id = body["user"]["id"].as_str().context("user id missing")?.to_string();
        Ok((token, id))
    }

    /// Registers an account and promotes it directly in the store.
    pub async fn register_with_role(&self, name: &str, email: &str, role: &str) -> Result<(String, String)> {
        let (token, id) = self.register(name, email).await?;
        sqlx::query("UPDATE users SET role = ? WHERE id = ?")
            .bind(role)
            .bind(&id)
            .execute(&self.pool)
            .await?;
        Ok((token, id))
    }

    pub async fn create_pet(&self, token: &str, name: &str, status: &str, breed: &str) -> Result<Value> {
        let (code, body) = self
            .send("POST", "/pets", Some(token), Some(pet_body(name, status, breed)))
            .await?;
        assert_eq!(code, StatusCode::CREATED, "create pet: {body}");
        Ok(body)
    }

    /// Audit rows are written by a background task; poll until `expected` rows match.
    pub async fn wait_for_audit_rows(&self, record_id: &str, expected: i64) -> Result<i64> {
        let mut count = 0;
        for _ in 0..100 {
            count = sqlx::query_scalar("SELECT COUNT(1) FROM audit_logs WHERE record_id = ?")
                .bind(record_id)
                .fetch_one(&self.pool)
                .await?;
            if count >= expected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        Ok(count)
    }

    /// Polls until the whole trail holds at least `expected` rows.
    pub async fn wait_for_total_audit_rows(&self, expected: i64) -> Result<i64> {
        let mut count = 0;
        for _ in 0..250 {
            count = sqlx::query_scalar("SELECT COUNT(1) FROM audit_logs")
                .fetch_one(&self.pool)
                .await?;
            if count >= expected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        Ok(count)
    }
}

pub fn pet_body(name: &str, status: &str, breed: &str) -> Value {
    json!({
        "name": name,
        "type": "Dog",
        "breed": breed,
        "status": status,
        "location": "Central Park, New York",
        "coordinates": { "lat": 40.7829, "lng": -73.9654 },
        "microchipped": true
    })
}
