use serde_json::{json, Value};
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

use pic_rater::config::Config;
use pic_rater::gallery::image_id_for;
use pic_rater::metadata::NoMetadata;
use pic_rater::migrate;
use pic_rater::server::{router, AppState};

struct TestServer {
    _tmp: TempDir,
    base: String,
    client: reqwest::Client,
}

async fn start(files: &[&str]) -> TestServer {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("gallery");
    for relpath in files {
        let path = root.join(relpath);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, relpath.as_bytes()).unwrap();
    }
    fs::create_dir_all(&root).unwrap();

    let config = Config::for_gallery(&root, tmp.path().join("data/server.sqlite"));
    let pool = migrate::open(&config).await.unwrap();
    let app = router(AppState::new(config, pool, Arc::new(NoMetadata)));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap();

    TestServer {
        _tmp: tmp,
        base: format!("http://{}", addr),
        client,
    }
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn get_json(&self, path: &str) -> (u16, Value) {
        let resp = self.client.get(self.url(path)).send().await.unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    async fn post_json(&self, path: &str, body: Value) -> (u16, Value) {
        let resp = self
            .client
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    async fn post_raw(&self, path: &str, body: &'static str) -> (u16, Value) {
        let resp = self
            .client
            .post(self.url(path))
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }
}

#[tokio::test]
async fn test_health_and_categories() {
    let server = start(&["landscape/a.jpg", "portrait/b.jpg", "loose.png"]).await;

    let (status, body) = server.get_json("/health").await;
    assert_eq!(status, 200);
    assert_eq!(body["ok"], true);
    assert_eq!(body["total_files"], 3);
    assert_eq!(body["registered_images"], 0);
    assert_eq!(body["top_categories"], json!(["landscape", "portrait"]));

    let (status, body) = server.get_json("/categories").await;
    assert_eq!(status, 200);
    assert_eq!(body["categories"], json!(["landscape", "portrait"]));
}

#[tokio::test]
async fn test_reindex_accepts_every_body_shape() {
    let server = start(&["a/one.jpg", "a/two.jpg"]).await;

    let (status, body) = server.post_raw("/reindex", "").await;
    assert_eq!(status, 200);
    assert_eq!(body["indexed"], 2);
    assert_eq!(body["added"], 2);

    let (status, body) = server.post_raw("/reindex", "true").await;
    assert_eq!(status, 200);
    assert_eq!(body["purged"], 0);

    let (status, body) = server
        .post_json("/reindex", json!({ "purge_missing": false }))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["added"], 0);

    let (status, body) = server.post_raw("/reindex", "[1]").await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn test_random_pic_json_and_redirect() {
    let server = start(&["sea side/wave 1.jpg"]).await;

    let (status, body) = server.get_json("/random_pic?cat=sea%20side").await;
    assert_eq!(status, 200);
    assert_eq!(body["relpath"], "sea side/wave 1.jpg");
    assert_eq!(body["id"], image_id_for("sea side/wave 1.jpg"));
    assert_eq!(body["category"], "sea side");
    assert_eq!(body["url"], "/static/sea%20side/wave%201.jpg");

    let resp = server
        .client
        .get(server.url("/random_pic?redirect=true"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 302);
    let location = resp.headers()["location"].to_str().unwrap().to_string();
    assert_eq!(location, "/static/sea%20side/wave%201.jpg");

    // The redirect target is served from the gallery.
    let file = server.client.get(server.url(&location)).send().await.unwrap();
    assert_eq!(file.status().as_u16(), 200);
    assert_eq!(file.text().await.unwrap(), "sea side/wave 1.jpg");
}

#[tokio::test]
async fn test_random_pic_errors() {
    let server = start(&["a/one.jpg"]).await;

    let (status, body) = server.get_json("/random_pic?cat=missing").await;
    assert_eq!(status, 404);
    assert_eq!(body["error"]["code"], "not_found");

    let (status, body) = server.get_json("/random_pic?bias=sideways").await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn test_rate_search_and_stats() {
    let server = start(&["beach/sunset.jpg", "beach/noon.jpg", "city/night.jpg"]).await;
    server.post_raw("/reindex", "").await;
    let id = image_id_for("beach/sunset.jpg");

    let (status, body) = server
        .post_json("/rate", json!({ "id": id, "score": 4, "note": "warm" }))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["count"], 1);
    assert_eq!(body["avg"], 4.0);
    assert_eq!(body["wrote_meta"], false);

    let (status, body) = server
        .post_json("/rate", json!({ "id": "beach/sunset.jpg", "score": 2 }))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["id"], id);
    assert_eq!(body["count"], 2);
    assert_eq!(body["avg"], 3.0);

    let (status, body) = server
        .post_json("/rate", json!({ "id": id, "score": 7 }))
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "bad_request");

    let (status, body) = server
        .post_json("/rate", json!({ "id": "nope", "score": 3 }))
        .await;
    assert_eq!(status, 404);
    assert_eq!(body["error"]["code"], "not_found");

    let (status, body) = server.get_json("/search?q=beach&limit=5").await;
    assert_eq!(status, 200);
    assert_eq!(body["q"], "beach");
    let items = body["items"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    // Unrated first.
    assert_eq!(items[0]["relpath"], "beach/noon.jpg");
    assert_eq!(items[1]["relpath"], "beach/sunset.jpg");

    let (status, body) = server.get_json(&format!("/stats?id={}", id)).await;
    assert_eq!(status, 200);
    assert_eq!(body["image"]["rating_count"], 2);
    let ratings = body["ratings"].as_array().unwrap();
    assert_eq!(ratings.len(), 2);
    assert_eq!(ratings[0]["score"], 2.0);
    assert_eq!(ratings[1]["note"], "warm");

    let (status, body) = server.get_json("/stats?top=1").await;
    assert_eq!(status, 200);
    let top = body["top"].as_array().unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0]["relpath"], "beach/sunset.jpg");
}

#[tokio::test]
async fn test_maintenance_endpoints() {
    let server = start(&["a/one.jpg", "b/two.jpg"]).await;
    server.post_raw("/reindex", "").await;

    let (status, body) = server.post_raw("/sync_subjects?limit=0", "").await;
    assert_eq!(status, 200);
    assert_eq!(body["processed"], 2);

    let (status, body) = server.post_raw("/admin/rebuild_fts", "").await;
    assert_eq!(status, 200);
    assert_eq!(body["ok"], true);
    assert_eq!(body["mode"], "full");
    assert_eq!(body["rows"], 2);

    let (status, body) = server.post_raw("/admin/rebuild_fts?full=false", "").await;
    assert_eq!(status, 200);
    assert_eq!(body["mode"], "incremental");

    let (status, body) = server.post_raw("/admin/refresh_fts", "").await;
    assert_eq!(status, 200);
    assert_eq!(body["rows"], 2);

    let (status, body) = server.post_raw("/admin/refresh_fts_tags", "").await;
    assert_eq!(status, 200);
    assert_eq!(body["mode"], "incremental");
    assert_eq!(body["rows"], 2);

    let (status, body) = server.get_json("/search?q=two").await;
    assert_eq!(status, 200);
    assert_eq!(body["items"][0]["relpath"], "b/two.jpg");
}
