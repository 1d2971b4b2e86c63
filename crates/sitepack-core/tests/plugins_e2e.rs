//! End-to-end bundling with the worker and remote-module plugins.

use axum::response::Redirect;
use axum::routing::get;
use axum::Router;
use sitepack_core::bundler::plugins::{RemoteModulePlugin, WorkerPlugin, REMOTE_NAMESPACE};
use sitepack_core::bundler::{codes, BuildOptions, BundleOptions, Bundler};
use sitepack_core::fetch::HttpFetcher;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::tempdir;
use tracing_subscriber::fmt::MakeWriter;

/// Log sink shared between the subscriber and the test.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn write(dir: &Path, rel: &str, contents: &str) {
    let path = dir.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

/// Serve a small remote package; returns `http://127.0.0.1:<port>`.
async fn serve_remote() -> String {
    let app = Router::new()
        .route("/lib/mod.ts", get(|| async { Redirect::temporary("/v2/mod.ts") }))
        .route(
            "/v2/mod.ts",
            get(|| async { "export { helper } from './helper.ts';\nexport const v = 2;\n" }),
        )
        .route(
            "/v2/helper.ts",
            get(|| async { "export function helper() {\n  return 'remote';\n}\n" }),
        )
        .route("/other.ts", get(|| async { "export const other = true;\n" }));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn remote_bundler(cwd: &Path) -> Bundler {
    Bundler::new(cwd.to_path_buf())
        .with_plugin(Box::new(RemoteModulePlugin::new(Arc::new(
            HttpFetcher::new().unwrap(),
        ))))
        .unwrap()
}

#[tokio::test]
async fn test_remote_imports_follow_served_location() {
    let base = serve_remote().await;
    let dir = tempdir().unwrap();
    write(
        dir.path(),
        "main.ts",
        &format!(
            "import {{ helper, v }} from '{base}/lib/mod.ts';\nimport {{ other }} from '{base}/other.ts';\nconsole.log(helper(), v, other);\n"
        ),
    );

    let result = remote_bundler(dir.path())
        .bundle("main.ts", dir.path(), &BundleOptions::default())
        .await
        .unwrap();

    let remote: Vec<&String> = result
        .modules
        .iter()
        .filter(|m| m.starts_with(REMOTE_NAMESPACE))
        .collect();
    assert_eq!(remote.len(), 3, "{:?}", result.modules);
    assert!(result
        .modules
        .contains(&format!("{REMOTE_NAMESPACE}:{base}/v2/helper.ts")));
    assert!(result.code.contains("return 'remote';"));
    assert!(result.code.contains("const other = true;"));
}

#[tokio::test]
async fn test_remote_entry_point() {
    let base = serve_remote().await;
    let dir = tempdir().unwrap();

    let result = remote_bundler(dir.path())
        .bundle(&format!("{base}/v2/mod.ts"), dir.path(), &BundleOptions::default())
        .await
        .unwrap();
    assert_eq!(result.modules.len(), 2);
    assert!(result.code.contains("export const { helper, v } = __entry;"));
}

#[tokio::test]
async fn test_remote_404_fails_the_build() {
    let base = serve_remote().await;
    let dir = tempdir().unwrap();
    write(dir.path(), "main.ts", &format!("import '{base}/missing.ts';\n"));

    let bundler = remote_bundler(dir.path());
    let options = BuildOptions::new("main.ts", "out/main.js", dir.path());
    let err = bundler.build(&options).await.unwrap_err();

    assert_eq!(err.code, codes::PLUGIN_ERROR);
    assert!(err.message.contains("404"), "{}", err.message);
    assert!(!dir.path().join("out/main.js").exists());
}

fn worker_bundler(cwd: &Path) -> Bundler {
    let nested = Arc::new(Bundler::new(cwd.to_path_buf()));
    Bundler::new(cwd.to_path_buf())
        .with_plugin(Box::new(WorkerPlugin::new(nested)))
        .unwrap()
}

#[tokio::test]
async fn test_worker_import_builds_separate_bundle() {
    let dir = tempdir().unwrap();
    write(
        dir.path(),
        "src/ts/main.ts",
        "import sieveUrl from 'worker:./workers/sieve.ts';\nexport const worker = new Worker(sieveUrl, { type: 'module' });\n",
    );
    write(
        dir.path(),
        "src/ts/workers/sieve.ts",
        "import { primes } from './primes';\nself.onmessage = (e) => postMessage(primes(e.data));\n",
    );
    write(
        dir.path(),
        "src/ts/workers/primes.ts",
        "// sieve of eratosthenes\nexport function primes(n) {\n  return n;\n}\n",
    );
    write(dir.path(), "shims/node-shim.js", "globalThis.process = { env: {} };\n");

    let bundler = worker_bundler(dir.path());
    let output = bundler
        .build(&BuildOptions::new("src/ts/main.ts", "docs/js/main.min.js", dir.path()))
        .await
        .unwrap();
    assert!(output.modules.iter().any(|m| m == "web-worker:./workers/sieve.ts"));

    let worker_js = dir.path().join("docs/js/sieve.worker.js");
    let worker = std::fs::read_to_string(&worker_js).unwrap();
    assert!(worker.starts_with("const global = globalThis;\n"));
    assert!(worker.contains("globalThis.process = { env: {} };"));
    assert!(!worker.contains("sieve of eratosthenes"));
    assert!(worker.ends_with("//# sourceMappingURL=sieve.worker.js.map\n"));
    assert!(dir.path().join("docs/js/sieve.worker.js.map").is_file());

    let main = std::fs::read_to_string(dir.path().join("docs/js/main.min.js")).unwrap();
    assert!(main.contains("exports.default = \"./js/sieve.worker.js\";"));
    assert!(!main.contains("postMessage"));
}

#[tokio::test]
async fn test_failed_worker_build_leaves_module_missing() {
    let dir = tempdir().unwrap();
    write(dir.path(), "src/main.ts", "import url from 'worker:./broken.ts';\nconsole.log(url);\n");
    write(dir.path(), "src/broken.ts", "import './does-not-exist';\n");

    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_max_level(tracing::Level::ERROR)
        .with_ansi(false)
        .finish();
    // Current-thread runtime: the guard covers every poll of the build.
    let _guard = tracing::subscriber::set_default(subscriber);

    let err = worker_bundler(dir.path())
        .bundle("src/main.ts", dir.path(), &BundleOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code, codes::BUNDLE_MODULE_NOT_FOUND);
    assert_eq!(err.path.as_deref(), Some("web-worker:./broken.ts"));

    let logged = logs.contents();
    assert!(logged.contains("ERROR"), "{logged}");
    assert!(logged.contains("worker build failed"), "{logged}");
    assert!(logged.contains("broken.ts"), "{logged}");
}

#[tokio::test]
async fn test_plain_imports_are_untouched_by_plugins() {
    let dir = tempdir().unwrap();
    write(dir.path(), "main.ts", "import { a } from './a';\nconsole.log(a);\n");
    write(dir.path(), "a.ts", "export const a = 1;\n");

    let nested = Arc::new(Bundler::new(dir.path().to_path_buf()));
    let with_plugins = Bundler::new(dir.path().to_path_buf())
        .with_plugin(Box::new(WorkerPlugin::new(nested)))
        .unwrap()
        .with_plugin(Box::new(RemoteModulePlugin::new(Arc::new(HttpFetcher::new().unwrap()))))
        .unwrap();
    let plain = Bundler::new(dir.path().to_path_buf());

    let options = BundleOptions::default();
    let a = with_plugins.bundle("main.ts", dir.path(), &options).await.unwrap();
    let b = plain.bundle("main.ts", dir.path(), &options).await.unwrap();
    assert_eq!(a.code, b.code);
    assert_eq!(a.modules, b.modules);
}
