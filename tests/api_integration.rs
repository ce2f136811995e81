//! Integration tests for Clientele API endpoints.
//!
//! These tests verify the full request/response cycle through the HTTP API.

use axum::http::StatusCode;
use axum_test::TestServer;
use serde_json::json;

// Import from the clientele crate
use clientele::api::{AppState, router};
use clientele::keys::client_id;
use clientele::storage::Storage;

const CLIENTS_CSV: &str = "nom,nombre_prestations\nJean Dupont,0\n";
const PRESTATIONS_CSV: &str = "client,date,montant\nACME Corp,15/03/2024,1200\n";

async fn create_test_server() -> TestServer {
    let storage = Storage::new("sqlite::memory:").await.unwrap();
    let state = AppState { storage };

    TestServer::new(router(state)).unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let server = create_test_server().await;

    let response = server.get("/health").await;

    response.assert_status_ok();
}

#[tokio::test]
async fn test_import_scenario() {
    let server = create_test_server().await;

    let response = server
        .post("/import")
        .json(&json!({
            "clients_csv": CLIENTS_CSV,
            "prestations_csv": PRESTATIONS_CSV
        }))
        .await;

    response.assert_status_ok();

    let body: serde_json::Value = response.json();
    assert_eq!(body["clients_upserted"], 2);
    assert_eq!(body["prestations_upserted"], 1);
    assert_eq!(body["clients_segmented"], 2);

    let jean: serde_json::Value = server
        .get(&format!("/clients/{}", client_id("Jean Dupont")))
        .await
        .json();
    assert_eq!(jean["client"]["stats"]["total_prestations"], 0);
    assert!(jean["client"]["stats"]["days_inactive"].is_null());
    assert_eq!(jean["client"]["segmentation"]["lifecycle"], "a_relancer");
    assert_eq!(jean["client"]["segmentation"]["vip"], false);

    let acme: serde_json::Value = server
        .get(&format!("/clients/{}", client_id("ACME Corp")))
        .await
        .json();
    assert_eq!(acme["client"]["stats"]["total_prestations"], 1);
    assert_eq!(acme["client"]["stats"]["total_revenue"], 1200.0);
    assert_eq!(acme["prestations"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_import_missing_column() {
    let server = create_test_server().await;

    let response = server
        .post("/import")
        .json(&json!({
            "clients_csv": "name\nJean Dupont\n",
            "prestations_csv": PRESTATIONS_CSV
        }))
        .await;

    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);

    let body: serde_json::Value = response.json();
    assert!(body["error"].as_str().unwrap().contains("nom"));

    // Nothing was written
    let clients: serde_json::Value = server.get("/clients").await.json();
    assert!(clients.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_import_twice_is_idempotent() {
    let server = create_test_server().await;
    let body = json!({
        "clients_csv": CLIENTS_CSV,
        "prestations_csv": PRESTATIONS_CSV
    });

    let first: serde_json::Value = server.post("/import").json(&body).await.json();
    let clients_first: serde_json::Value = server.get("/clients").await.json();

    let second: serde_json::Value = server.post("/import").json(&body).await.json();
    let clients_second: serde_json::Value = server.get("/clients").await.json();

    assert_eq!(first, second);
    assert_eq!(clients_first, clients_second);
    assert_eq!(clients_second.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_clients_filter_by_lifecycle() {
    let server = create_test_server().await;

    server
        .post("/import")
        .json(&json!({
            "clients_csv": CLIENTS_CSV,
            "prestations_csv": PRESTATIONS_CSV
        }))
        .await
        .assert_status_ok();

    let response = server.get("/clients?lifecycle=a_relancer&vip=false").await;
    response.assert_status_ok();

    let clients: serde_json::Value = response.json();
    let names: Vec<&str> = clients
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"Jean Dupont"));
}

#[tokio::test]
async fn test_unknown_client_is_not_found() {
    let server = create_test_server().await;

    let response = server.get("/clients/client_missing").await;

    response.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_duplicates_detect_and_clean() {
    let server = create_test_server().await;

    server
        .post("/import")
        .json(&json!({
            "clients_csv": "nom\n",
            "prestations_csv": "client,date,montant,numero_facture\n\
                                ACME Corp,15/03/2024,1200,F-1\n\
                                ACME Corp,15/03/2024,1200,F-2\n\
                                ACME Corp,15/03/2024,\"1200,01\",F-3\n"
        }))
        .await
        .assert_status_ok();

    let response = server.get("/duplicates").await;
    response.assert_status_ok();

    let body: serde_json::Value = response.json();
    assert_eq!(body["groups"], 1);
    assert_eq!(body["duplicates_removable"], 1);
    assert_eq!(body["total_records"], 3);

    let body: serde_json::Value = server.post("/duplicates/clean").await.json();
    assert_eq!(body["deleted"], 1);
    assert_eq!(body["kept"], 2);

    let body: serde_json::Value = server.post("/duplicates/clean").await.json();
    assert_eq!(body["deleted"], 0);

    let acme: serde_json::Value = server
        .get(&format!("/clients/{}", client_id("ACME Corp")))
        .await
        .json();
    assert_eq!(acme["client"]["stats"]["total_prestations"], 2);
}

#[tokio::test]
async fn test_manual_prestation_workflow() {
    let server = create_test_server().await;

    // 1. Record a prestation for a new client
    let response = server
        .post("/prestations")
        .json(&json!({
            "client_name": "Claire Martin",
            "date": "2024-06-01",
            "amount": 800.0,
            "reference": "Mariage"
        }))
        .await;
    response.assert_status(StatusCode::CREATED);

    let prestation: serde_json::Value = response.json();
    assert_eq!(prestation["source"], "manual");
    let prestation_id = prestation["id"].as_str().unwrap().to_string();

    // 2. Create a second client and move the prestation there
    server
        .post("/prestations")
        .json(&json!({
            "client_name": "Paul Durand",
            "date": "2024-05-01",
            "amount": 50.0
        }))
        .await
        .assert_status(StatusCode::CREATED);

    let response = server
        .post(&format!("/prestations/{}/transfer", prestation_id))
        .json(&json!({ "client_id": client_id("Paul Durand") }))
        .await;
    response.assert_status_ok();

    let paul: serde_json::Value = server
        .get(&format!("/clients/{}", client_id("Paul Durand")))
        .await
        .json();
    assert_eq!(paul["client"]["stats"]["total_prestations"], 2);
    assert_eq!(paul["client"]["stats"]["total_revenue"], 850.0);

    // 3. Delete it
    server
        .delete(&format!("/prestations/{}", prestation_id))
        .await
        .assert_status(StatusCode::NO_CONTENT);
    server
        .delete(&format!("/prestations/{}", prestation_id))
        .await
        .assert_status(StatusCode::NOT_FOUND);

    // 4. Transfer to an unknown client
    let response = server
        .post("/prestations/prest_missing/transfer")
        .json(&json!({ "client_id": client_id("Paul Durand") }))
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_manual_prestation_requires_client_name() {
    let server = create_test_server().await;

    let response = server
        .post("/prestations")
        .json(&json!({
            "client_name": "  ",
            "date": "2024-06-01",
            "amount": 800.0
        }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_refresh_clients() {
    let server = create_test_server().await;

    server
        .post("/import")
        .json(&json!({
            "clients_csv": CLIENTS_CSV,
            "prestations_csv": PRESTATIONS_CSV
        }))
        .await
        .assert_status_ok();

    let response = server.post("/clients/refresh").await;
    response.assert_status_ok();

    let body: serde_json::Value = response.json();
    assert_eq!(body["clients_segmented"], 2);
}

#[tokio::test]
async fn test_incremental_import_keeps_earlier_prestations_in_stats() {
    let server = create_test_server().await;

    for prestations_csv in [
        "client,date,montant\nACME Corp,15/03/2024,1200\nACME Corp,16/03/2024,800\n",
        "client,date,montant\nACME Corp,20/05/2024,100\n",
    ] {
        server
            .post("/import")
            .json(&json!({
                "clients_csv": "nom\n",
                "prestations_csv": prestations_csv
            }))
            .await
            .assert_status_ok();
    }

    let acme: serde_json::Value = server
        .get(&format!("/clients/{}", client_id("ACME Corp")))
        .await
        .json();
    assert_eq!(acme["prestations"].as_array().unwrap().len(), 3);
    assert_eq!(acme["client"]["stats"]["total_prestations"], 3);
    assert_eq!(acme["client"]["stats"]["total_revenue"], 2100.0);
}
