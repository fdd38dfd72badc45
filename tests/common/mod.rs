//! Shared fixtures for integration tests.

use servio::config::ServioConfig;
use servio::servable::manifest::{ServableManifest, MethodSpec, MANIFEST_FILE};
use servio::servable::model::{DataType, ModelFormat, PostprocessStep, TensorSpec};
use servio::ModelGateway;
use std::path::Path;
use std::sync::Arc;

/// Write an image-classifier style servable: identity-forwarded scores with
/// argmax + label decoding, plus a raw echo method.
pub fn write_classifier(root: &Path, name: &str, versions: &[u32]) {
    let model_dir = root.join(name);
    std::fs::create_dir_all(&model_dir).unwrap();

    let manifest = ServableManifest {
        model_file: "model.mindir".to_string(),
        format: ModelFormat::MindIr,
        labels_file: Some("labels.txt".to_string()),
        methods: vec![
            MethodSpec::new("classify")
                .input(TensorSpec::new("score", DataType::Float32, vec![-1, 3]))
                .output(TensorSpec::new("score", DataType::Float32, vec![-1, 3]))
                .postprocess(PostprocessStep::Argmax { axis: -1 })
                .postprocess(PostprocessStep::DecodeLabels),
            MethodSpec::new("echo")
                .input(TensorSpec::new("x", DataType::Float32, vec![-1, 2]))
                .output(TensorSpec::new("x", DataType::Float32, vec![-1, 2])),
        ],
    };

    std::fs::write(
        model_dir.join(MANIFEST_FILE),
        serde_json::to_string_pretty(&manifest).unwrap(),
    )
    .unwrap();
    std::fs::write(model_dir.join("labels.txt"), "tabby cat\nlabrador retriever\ngoldfish\n")
        .unwrap();

    for v in versions {
        let version_dir = model_dir.join(v.to_string());
        std::fs::create_dir_all(&version_dir).unwrap();
        std::fs::write(version_dir.join("model.mindir"), format!("graph-v{}", v)).unwrap();
    }
}

/// Start a gateway over a model root, scanning and loading everything.
pub async fn start_gateway(root: &Path) -> Arc<ModelGateway> {
    let mut config = ServioConfig::development();
    config.registry.model_root = root.to_path_buf();
    let gateway = Arc::new(ModelGateway::new(config));
    gateway.registry().scan().await.unwrap();
    gateway.start().await.unwrap();
    gateway
}

/// Bind the serving API on an ephemeral port and return its address.
pub async fn serve(gateway: Arc<ModelGateway>) -> std::net::SocketAddr {
    let config = servio::config::ServerConfig::default();
    let app = servio::server::router(gateway, &config);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}
