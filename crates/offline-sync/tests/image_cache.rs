use std::collections::HashMap;
use std::sync::Arc;

use plaasjapie_core::Error;
use plaasjapie_offline_sync::ImageCache;
use tempfile::tempdir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\nfake-image";

/// Serves `routes` (path -> body); every other path is a 404. Returns the requested paths.
async fn start_image_server(
    routes: HashMap<String, Vec<u8>>,
) -> (String, Arc<Mutex<Vec<String>>>, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("listener addr");
    let requested = Arc::new(Mutex::new(Vec::<String>::new()));
    let requested_clone = Arc::clone(&requested);

    let handle = tokio::spawn(async move {
        loop {
            let (mut stream, _) = match listener.accept().await {
                Ok(value) => value,
                Err(_) => break,
            };
            let mut buffer = Vec::new();
            loop {
                let mut chunk = [0_u8; 1024];
                let read = match stream.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(read) => read,
                };
                buffer.extend_from_slice(&chunk[..read]);
                if buffer.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
            let head = String::from_utf8_lossy(&buffer).to_string();
            let path = head
                .lines()
                .next()
                .and_then(|line| line.split_whitespace().nth(1))
                .unwrap_or("/")
                .to_string();
            requested_clone.lock().await.push(path.clone());

            let (status, body) = match routes.get(&path) {
                Some(body) => ("200 OK", body.clone()),
                None => ("404 Not Found", b"missing".to_vec()),
            };
            let head = format!(
                "HTTP/1.1 {}\r\nContent-Type: image/png\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                status,
                body.len()
            );
            let _ = stream.write_all(head.as_bytes()).await;
            let _ = stream.write_all(&body).await;
            let _ = stream.flush().await;
        }
    });

    (format!("http://{}", addr), requested, handle)
}

fn routes(paths: &[&str]) -> HashMap<String, Vec<u8>> {
    paths
        .iter()
        .map(|path| (path.to_string(), PNG_BYTES.to_vec()))
        .collect()
}

#[tokio::test]
async fn resolve_downloads_once_and_reuses_the_file() {
    let (base_url, requested, server) = start_image_server(routes(&["/p/anna.png"])).await;
    let dir = tempdir().expect("tempdir");
    let cache = ImageCache::new(dir.path().join("images")).expect("cache");
    let url = format!("{}/p/anna.png", base_url);

    assert!(cache.cached_path(&url).await.is_none());
    let first = cache.resolve(&url).await.expect("first resolve");
    let second = cache.resolve(&url).await.expect("second resolve");

    assert_eq!(first, second);
    assert_eq!(std::fs::read(&first).expect("cached bytes"), PNG_BYTES);
    assert!(first.to_string_lossy().ends_with(".png"));
    assert_eq!(requested.lock().await.len(), 1);
    assert_eq!(cache.cached_path(&url).await, Some(first));

    server.abort();
}

#[tokio::test]
async fn failed_download_is_image_unavailable_and_leaves_nothing_behind() {
    let (base_url, _requested, server) = start_image_server(HashMap::new()).await;
    let dir = tempdir().expect("tempdir");
    let images_dir = dir.path().join("images");
    let cache = ImageCache::new(&images_dir).expect("cache");

    let err = cache
        .resolve(&format!("{}/p/ghost.jpg", base_url))
        .await
        .expect_err("404");

    assert!(matches!(err, Error::ImageUnavailable { .. }));
    let leftovers = std::fs::read_dir(&images_dir)
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(leftovers, 0);

    server.abort();
}

#[tokio::test]
async fn concurrent_resolves_share_one_download() {
    let (base_url, requested, server) = start_image_server(routes(&["/p/jan.webp"])).await;
    let dir = tempdir().expect("tempdir");
    let cache = ImageCache::new(dir.path().join("images")).expect("cache");
    let url = format!("{}/p/jan.webp", base_url);

    let (a, b, c) = tokio::join!(cache.resolve(&url), cache.resolve(&url), cache.resolve(&url));

    let a = a.expect("a");
    assert_eq!(a, b.expect("b"));
    assert_eq!(a, c.expect("c"));
    assert_eq!(requested.lock().await.len(), 1);

    server.abort();
}

#[tokio::test]
async fn prefetch_counts_resolved_images_and_clear_empties_the_cache() {
    let (base_url, requested, server) =
        start_image_server(routes(&["/a.jpg", "/b.png"])).await;
    let dir = tempdir().expect("tempdir");
    let images_dir = dir.path().join("images");
    let cache = ImageCache::new(&images_dir).expect("cache");

    let urls = vec![
        format!("{}/a.jpg", base_url),
        format!("{}/b.png", base_url),
        format!("{}/a.jpg", base_url),
        format!("{}/missing.gif", base_url),
    ];
    let resolved = cache.prefetch(urls).await;

    assert_eq!(resolved, 2);
    assert_eq!(requested.lock().await.len(), 3);

    cache.clear().await.expect("clear");
    assert!(!images_dir.exists());
    assert!(cache
        .cached_path(&format!("{}/a.jpg", base_url))
        .await
        .is_none());
    cache.clear().await.expect("clearing twice is fine");

    server.abort();
}
