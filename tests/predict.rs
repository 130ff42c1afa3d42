use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use approx::assert_abs_diff_eq;
use candle_core::{Device, Tensor};
use furnisher_surrogate::{
    Checkpoint, InferenceService, ModelCache, ModelConfig, NormalizationStats, ScoreRequest,
    ServiceConfig, Standardizer, SurrogateError, TabularLayout, IMG_SIZE,
};

const RECT: [[f64; 2]; 5] = [[0.0, 0.0], [4.0, 0.0], [4.0, 3.0], [0.0, 3.0], [0.0, 0.0]];
const DOOR: [f64; 2] = [2.0, 0.0];

fn small_config() -> ModelConfig {
    ModelConfig {
        channels: vec![4, 4, 4, 4],
        embed_dim: 4,
        fc_hidden: 8,
        ..Default::default()
    }
}

fn set(weights: &mut HashMap<String, Tensor>, name: &str, values: Vec<f32>) {
    let shape = weights[name].shape().clone();
    let t = Tensor::from_vec(values, shape, &Device::Cpu).unwrap();
    weights.insert(name.to_string(), t);
}

/// score = 10 * relu(area_std) + bias (+ shortcut_bias when the shortcut is
/// enabled). Every other weight is zero so the image branch contributes
/// nothing.
fn analytic_weights(config: &ModelConfig, bias: f32, shortcut_bias: f32) -> HashMap<String, Tensor> {
    let mut weights = Checkpoint::zeroed_parameters(config).unwrap();
    let pooled = config.image_bottleneck.unwrap_or(*config.channels.last().unwrap());
    let raw = config.embed_dim + config.n_tabular;
    let fc_in = pooled + config.tabular_hidden.unwrap_or(raw);
    // area_std is the first tabular value, right after the embedding
    let area_col = pooled + config.embed_dim;

    let mut hidden = vec![0.0; config.fc_hidden * fc_in];
    hidden[area_col] = 1.0;
    set(&mut weights, "head.0.weight", hidden);
    let mut out = vec![0.0; config.fc_hidden];
    out[0] = 10.0;
    set(&mut weights, "head.3.weight", out);
    set(&mut weights, "head.3.bias", vec![bias]);
    if config.tabular_skip {
        set(&mut weights, "skip_head.2.bias", vec![shortcut_bias]);
    }
    weights
}

/// Every conv stage copies channel 0 through its centre tap and batch norm
/// only divides by sqrt(1 + eps), so the pooled feature is the share of
/// 16x16 mask blocks holding an interior pixel. score = 100 * that share.
fn centre_tap_weights(config: &ModelConfig) -> HashMap<String, Tensor> {
    let mut weights = Checkpoint::zeroed_parameters(config).unwrap();
    let mut in_c = 3;
    for (i, &out_c) in config.channels.iter().enumerate() {
        assert_eq!(out_c, 1);
        let mut kernel = vec![0.0; in_c * 9];
        kernel[4] = 1.0;
        set(&mut weights, &format!("conv.{}.weight", 4 * i), kernel);
        set(&mut weights, &format!("conv.{}.weight", 4 * i + 1), vec![1.0]);
        in_c = out_c;
    }
    let mut hidden = vec![0.0; 1 + config.embed_dim + config.n_tabular];
    hidden[0] = 1.0;
    set(&mut weights, "head.0.weight", hidden);
    set(&mut weights, "head.3.weight", vec![100.0]);
    weights
}

fn area_stats() -> NormalizationStats {
    NormalizationStats::area_only(Standardizer::new(10.0, 2.0))
}

fn write_checkpoint(dir: &Path, name: &str, config: &ModelConfig, bias: f32) -> PathBuf {
    let path = dir.join(name);
    let weights = analytic_weights(config, bias, 0.0);
    Checkpoint::save(&path, &weights, config, &area_stats()).unwrap();
    path
}

/// Service whose environment override can never be set by another test.
fn service(model_dir: &Path) -> InferenceService {
    InferenceService::new(ServiceConfig {
        model_dir: model_dir.to_path_buf(),
        model_env_var: "FURNISHER_TEST_MODEL_PATH_NEVER_SET".to_string(),
        ..Default::default()
    })
}

fn raw_safetensors(path: &Path, weights: &HashMap<String, Tensor>, config_json: &str) {
    let metadata = HashMap::from([
        ("config".to_string(), config_json.to_string()),
        (
            "normalization".to_string(),
            serde_json::to_string(&area_stats()).unwrap(),
        ),
    ]);
    let entries: Vec<(&String, &Tensor)> = weights.iter().collect();
    safetensors::serialize_to_file(entries, &Some(metadata), path).unwrap();
}

#[test]
fn regression_fixture_scores() {
    let dir = tempfile::tempdir().unwrap();
    write_checkpoint(dir.path(), "cnn_v1.safetensors", &small_config(), 50.0);
    let service = service(dir.path());

    // area 12 → area_std ≈ 1
    let score = service.predict(&ScoreRequest::new(&RECT, DOOR, "Bedroom")).unwrap();
    assert_abs_diff_eq!(score, 60.0, epsilon = 1e-4);

    // area 6 → area_std = -2, clipped by the ReLU
    let small = [[0.0, 0.0], [3.0, 0.0], [3.0, 2.0], [0.0, 2.0]];
    let score = service.predict(&ScoreRequest::new(&small, [1.5, 0.0], "Kitchen")).unwrap();
    assert_abs_diff_eq!(score, 50.0, epsilon = 1e-4);
}

#[test]
fn open_and_closed_rings_score_identically() {
    let dir = tempfile::tempdir().unwrap();
    write_checkpoint(dir.path(), "cnn_v1.safetensors", &small_config(), 50.0);
    let service = service(dir.path());
    let closed = service.predict(&ScoreRequest::new(&RECT, DOOR, "Bedroom")).unwrap();
    let open = service.predict(&ScoreRequest::new(&RECT[..4], DOOR, "Bedroom")).unwrap();
    assert_eq!(closed, open);
}

#[test]
fn scores_are_clamped_to_range() {
    let dir = tempfile::tempdir().unwrap();
    let high = write_checkpoint(dir.path(), "cnn_high.safetensors", &small_config(), 500.0);
    let low = write_checkpoint(dir.path(), "cnn_low.safetensors", &small_config(), -20.0);
    let service = service(dir.path());

    for room_type in ["Bedroom", "Kitchen", "Bathroom", "WC", "Living room"] {
        let request = ScoreRequest::new(&RECT, DOOR, room_type);
        assert_eq!(service.predict(&request.with_checkpoint(&high)).unwrap(), 100.0);
        // area 12 still adds 10 on top of -20
        assert_eq!(service.predict(&request.with_checkpoint(&low)).unwrap(), 0.0);
    }
}

#[test]
fn infinite_outputs_clip_and_nan_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let up = write_checkpoint(dir.path(), "cnn_up.safetensors", &small_config(), f32::INFINITY);
    let down = write_checkpoint(dir.path(), "cnn_down.safetensors", &small_config(), f32::NEG_INFINITY);
    let nan = write_checkpoint(dir.path(), "cnn_nan.safetensors", &small_config(), f32::NAN);
    let service = service(dir.path());

    let request = ScoreRequest::new(&RECT, DOOR, "Bedroom");
    assert_eq!(service.predict(&request.with_checkpoint(&up)).unwrap(), 100.0);
    assert_eq!(service.predict(&request.with_checkpoint(&down)).unwrap(), 0.0);
    let err = service.predict(&request.with_checkpoint(&nan)).unwrap_err();
    assert!(err.is_config_error());
    assert!(err.to_string().contains("cnn_nan.safetensors"));
}

#[test]
fn image_branch_reads_the_room_mask() {
    let dir = tempfile::tempdir().unwrap();
    let config = ModelConfig {
        channels: vec![1, 1, 1, 1],
        embed_dim: 1,
        fc_hidden: 1,
        ..Default::default()
    };
    let path = dir.path().join("cnn_mask.safetensors");
    Checkpoint::save(&path, &centre_tap_weights(&config), &config, &area_stats()).unwrap();

    let strip = [[0.0, 0.0], [4.0, 0.0], [4.0, 1.0], [0.0, 1.0]];
    let image = furnisher_surrogate::rasterize(&strip, DOOR).unwrap();
    let block = IMG_SIZE / 4;
    let mut lit = 0;
    for br in 0..4 {
        for bc in 0..4 {
            let inside = (0..block).any(|r| {
                (0..block).any(|c| image.get(0, br * block + r, bc * block + c) > 0)
            });
            if inside {
                lit += 1;
            }
        }
    }
    // a 60x15 px strip centred on the canvas spans two block rows
    assert_eq!(lit, 8);
    // four batch norms, each dividing by sqrt(1 + 1e-5)
    let expected = 100.0 * lit as f64 / 16.0 * (1.0 + 1e-5f64).powi(-2);

    let service = service(dir.path());
    let score = service
        .predict(&ScoreRequest::new(&strip, DOOR, "Bedroom").with_checkpoint(&path))
        .unwrap();
    assert_abs_diff_eq!(score, expected, epsilon = 1e-3);
    assert!(score < 50.0 && score > 49.99);
}

#[test]
fn unknown_room_type_is_rejected_before_loading() {
    let dir = tempfile::tempdir().unwrap();
    write_checkpoint(dir.path(), "cnn_v1.safetensors", &small_config(), 50.0);
    let service = service(dir.path());

    let err = service.predict(&ScoreRequest::new(&RECT, DOOR, "Garage")).unwrap_err();
    assert!(matches!(err, SurrogateError::UnknownRoomType { .. }));
    assert!(err.is_input_error());
    assert!(err.to_string().contains("Unknown room_type 'Garage'"));
    assert!(err.to_string().contains("Children 4"));
    assert!(service.cache().is_empty());
}

#[test]
fn unknown_apartment_type_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    write_checkpoint(dir.path(), "cnn_v1.safetensors", &small_config(), 50.0);
    let service = service(dir.path());

    let request = ScoreRequest::new(&RECT, DOOR, "Bedroom").with_apartment_type("Penthouse");
    let err = service.predict(&request).unwrap_err();
    assert!(matches!(err, SurrogateError::UnknownApartmentType { .. }));

    // a known apartment type is accepted and does not change the score
    let with = ScoreRequest::new(&RECT, DOOR, "Bedroom").with_apartment_type("2-Bedroom");
    let without = ScoreRequest::new(&RECT, DOOR, "Bedroom");
    assert_eq!(service.predict(&with).unwrap(), service.predict(&without).unwrap());
}

#[test]
fn two_calls_load_the_checkpoint_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_checkpoint(dir.path(), "cnn_v1.safetensors", &small_config(), 50.0);
    let service = service(dir.path());

    let request = ScoreRequest::new(&RECT, DOOR, "Bedroom");
    let a = service.predict(&request).unwrap();
    let b = service.predict(&request.with_checkpoint(&path)).unwrap();
    assert_eq!(a, b);
    assert_eq!(service.cache().len(), 1);
    assert_eq!(service.cache().load_count(), 1);
}

#[test]
fn services_can_share_one_cache() {
    let dir = tempfile::tempdir().unwrap();
    write_checkpoint(dir.path(), "cnn_v1.safetensors", &small_config(), 50.0);
    let cache = Arc::new(ModelCache::new());
    let config = ServiceConfig {
        model_dir: dir.path().to_path_buf(),
        model_env_var: "FURNISHER_TEST_MODEL_PATH_NEVER_SET".to_string(),
        ..Default::default()
    };
    let first = InferenceService::with_cache(config.clone(), Arc::clone(&cache));
    let second = InferenceService::with_cache(config, Arc::clone(&cache));

    let request = ScoreRequest::new(&RECT, DOOR, "WC");
    first.predict(&request).unwrap();
    second.predict(&request).unwrap();
    assert_eq!(cache.load_count(), 1);
}

#[test]
fn directory_tier_picks_last_checkpoint_by_name() {
    let dir = tempfile::tempdir().unwrap();
    write_checkpoint(dir.path(), "cnn_v1.safetensors", &small_config(), 10.0);
    write_checkpoint(dir.path(), "cnn_v2.safetensors", &small_config(), 30.0);
    let service = service(dir.path());
    let score = service.predict(&ScoreRequest::new(&RECT, DOOR, "Bedroom")).unwrap();
    assert_abs_diff_eq!(score, 40.0, epsilon = 1e-4);
}

#[test]
fn missing_checkpoint_lists_every_option() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(dir.path());
    let err = service.predict(&ScoreRequest::new(&RECT, DOOR, "Bedroom")).unwrap_err();
    assert!(matches!(err, SurrogateError::CheckpointNotFound { .. }));
    let msg = err.to_string();
    assert!(msg.contains("FURNISHER_TEST_MODEL_PATH_NEVER_SET"));
    assert!(msg.contains("cnn_*.safetensors"));

    let missing = dir.path().join("gone.safetensors");
    let err = service
        .predict(&ScoreRequest::new(&RECT, DOOR, "Bedroom").with_checkpoint(&missing))
        .unwrap_err();
    assert!(matches!(err, SurrogateError::CheckpointNotFound { .. }));
}

#[test]
fn unsupported_tabular_width_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cnn_bad.safetensors");
    let weights = Checkpoint::zeroed_parameters(&small_config()).unwrap();
    raw_safetensors(
        &path,
        &weights,
        r#"{"channels": [4, 4, 4, 4], "embed_dim": 4, "fc_hidden": 8, "n_tabular": 4}"#,
    );

    let err = Checkpoint::load(&path).unwrap_err();
    assert!(matches!(err, SurrogateError::UnsupportedTabularWidth(4)));
    assert!(err.is_config_error());

    let service = service(dir.path());
    let err = service
        .predict(&ScoreRequest::new(&RECT, DOOR, "Bedroom").with_checkpoint(&path))
        .unwrap_err();
    assert!(err.is_config_error());
    assert!(service.cache().is_empty());
}

#[test]
fn config_disagreeing_with_weights_is_an_architecture_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cnn_skip.safetensors");
    let weights = Checkpoint::zeroed_parameters(&small_config()).unwrap();
    raw_safetensors(
        &path,
        &weights,
        r#"{"channels": [4, 4, 4, 4], "embed_dim": 4, "fc_hidden": 8, "tabular_skip": true}"#,
    );
    let err = Checkpoint::load(&path).unwrap_err();
    assert!(matches!(err, SurrogateError::ArchitectureMismatch(ref m) if m.contains("skip_head")));

    let wide = dir.path().join("cnn_wide.safetensors");
    raw_safetensors(
        &wide,
        &weights,
        r#"{"channels": [4, 4, 4, 8], "embed_dim": 4, "fc_hidden": 8}"#,
    );
    assert!(matches!(
        Checkpoint::load(&wide).unwrap_err(),
        SurrogateError::ArchitectureMismatch(_)
    ));
}

#[test]
fn tabular_vector_replays_stored_statistics() {
    let dir = tempfile::tempdir().unwrap();
    write_checkpoint(dir.path(), "cnn_v1.safetensors", &small_config(), 50.0);
    let service = service(dir.path());

    let prepared = service.prepare(&ScoreRequest::new(&RECT, DOOR, "Bedroom")).unwrap();
    assert_eq!(prepared.checkpoint.layout(), TabularLayout::Compact);
    assert_eq!(prepared.tabular.len(), 3);
    assert_abs_diff_eq!(prepared.tabular[0], 1.0, epsilon = 1e-6);
    assert_abs_diff_eq!(prepared.tabular[1], 0.5, epsilon = 1e-6);
    assert_abs_diff_eq!(prepared.tabular[2], 0.0, epsilon = 1e-6);
    assert_eq!(
        prepared.image,
        furnisher_surrogate::rasterize(&RECT, DOOR).unwrap()
    );
}

#[test]
fn extended_layout_without_geometry_stats_passes_values_through() {
    let dir = tempfile::tempdir().unwrap();
    let config = ModelConfig {
        n_tabular: 5,
        ..small_config()
    };
    write_checkpoint(dir.path(), "cnn_v5.safetensors", &config, 50.0);
    let service = service(dir.path());

    let prepared = service.prepare(&ScoreRequest::new(&RECT, DOOR, "Bedroom")).unwrap();
    assert_eq!(prepared.tabular.len(), 5);
    assert_abs_diff_eq!(prepared.tabular[3], 4.0 / 3.0, epsilon = 1e-6);
    assert_abs_diff_eq!(prepared.tabular[4], 4.0, epsilon = 1e-6);
    assert_abs_diff_eq!(prepared.evaluate().unwrap(), 60.0, epsilon = 1e-4);
}

#[test]
fn shortcut_adds_to_head_output() {
    let dir = tempfile::tempdir().unwrap();
    let config = ModelConfig {
        n_tabular: 5,
        tabular_skip: true,
        image_bottleneck: Some(6),
        tabular_hidden: None,
        ..small_config()
    };
    let path = dir.path().join("cnn_skip.safetensors");
    let stats = NormalizationStats {
        area: Standardizer::new(10.0, 2.0),
        aspect_ratio: Some(Standardizer::new(1.5, 0.5)),
        n_vertices: Some(Standardizer::new(5.0, 1.0)),
    };
    Checkpoint::save(&path, &analytic_weights(&config, 50.0, 5.0), &config, &stats).unwrap();

    let service = service(dir.path());
    let score = service
        .predict(&ScoreRequest::new(&RECT, DOOR, "Bedroom").with_checkpoint(&path))
        .unwrap();
    assert_abs_diff_eq!(score, 65.0, epsilon = 1e-4);
}

#[test]
fn batch_scores_each_room() {
    let dir = tempfile::tempdir().unwrap();
    write_checkpoint(dir.path(), "cnn_v1.safetensors", &small_config(), 50.0);
    let service = service(dir.path());
    let small = [[0.0, 0.0], [3.0, 0.0], [3.0, 2.0], [0.0, 2.0]];
    let scores = service
        .predict_batch(&[
            ScoreRequest::new(&RECT, DOOR, "Bedroom"),
            ScoreRequest::new(&small, [0.0, 1.0], "Bathroom"),
        ])
        .unwrap();
    assert_eq!(scores.len(), 2);
    assert_abs_diff_eq!(scores[0], 60.0, epsilon = 1e-4);
    assert_abs_diff_eq!(scores[1], 50.0, epsilon = 1e-4);
}

#[test]
fn degenerate_rooms_still_score() {
    let dir = tempfile::tempdir().unwrap();
    write_checkpoint(dir.path(), "cnn_v1.safetensors", &small_config(), 50.0);
    let service = service(dir.path());
    let point = [[1.0, 1.0]; 4];
    let line = [[0.0, 0.0], [5.0, 0.0], [2.0, 0.0]];
    for poly in [&point[..], &line[..]] {
        let score = service.predict(&ScoreRequest::new(poly, [1.0, 0.0], "WC")).unwrap();
        assert!((0.0..=100.0).contains(&score));
    }
}

#[test]
fn malformed_polygon_is_an_input_error() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(dir.path());
    let err = service
        .predict(&ScoreRequest::new(&[[0.0, 0.0], [1.0, 0.0]], DOOR, "Bedroom"))
        .unwrap_err();
    assert!(matches!(err, SurrogateError::MalformedPolygon(_)));
}
