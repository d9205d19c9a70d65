//! Trained policy: a burn MLP over normalized observations
//!
//! Artifacts are JSON envelopes tagged with a format name and version. The
//! envelope carries the shapes and observation statistics; the network
//! weights travel inside it as a burn named-MessagePack record. Every shape
//! is checked at load time so inference never sees a mismatched tensor.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use burn::backend::NdArray;
use burn::module::{Module, Param};
use burn::nn::{Linear, LinearConfig, LinearRecord};
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkBytesRecorder, Recorder};
use burn::tensor::activation::relu;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{InferenceError, LoadError, SaveError};
use crate::planners::rl::action_space::NUM_ACTIONS;

pub const POLICY_FORMAT: &str = "wingman-policy";
pub const POLICY_VERSION: u32 = 2;

/// Added to the variance before taking the square root
const NORM_EPSILON: f32 = 1e-8;

/// CPU backend used for inference
pub type PolicyBackend = NdArray;

type Recording = NamedMpkBytesRecorder<FullPrecisionSettings>;

fn device() -> <PolicyBackend as Backend>::Device {
    Default::default()
}

/// Actor network: ReLU hidden layers and a linear head with one logit per action
#[derive(Module, Debug)]
pub struct PolicyNet<B: Backend> {
    hidden: Vec<Linear<B>>,
    output: Linear<B>,
}

impl<B: Backend> PolicyNet<B> {
    pub fn new(device: &B::Device, observation_size: usize, hidden: &[usize]) -> Self {
        let mut input = observation_size;
        let mut layers = Vec::with_capacity(hidden.len());
        for &size in hidden {
            layers.push(LinearConfig::new(input, size).init(device));
            input = size;
        }

        Self {
            hidden: layers,
            output: LinearConfig::new(input, NUM_ACTIONS).init(device),
        }
    }

    /// Raw logits, `[batch, NUM_ACTIONS]`
    pub fn forward(&self, obs: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self
            .hidden
            .iter()
            .fold(obs, |x, layer| relu(layer.forward(x)));
        self.output.forward(x)
    }
}

/// Explicit weights for one fully connected layer, `weights[input][output]`
#[derive(Debug, Clone, PartialEq)]
pub struct LayerWeights {
    pub weights: Vec<Vec<f32>>,
    pub bias: Vec<f32>,
}

impl LayerWeights {
    fn into_linear<B: Backend>(self, device: &B::Device) -> Linear<B> {
        let inputs = self.weights.len();
        let outputs = self.bias.len();
        let flat: Vec<f32> = self.weights.into_iter().flatten().collect();
        let weight = Tensor::<B, 2>::from_data(TensorData::new(flat, [inputs, outputs]), device);
        let bias = Tensor::<B, 1>::from_data(TensorData::new(self.bias, [outputs]), device);
        Linear {
            weight: Param::from_tensor(weight),
            bias: Some(Param::from_tensor(bias)),
        }
    }
}

/// Running observation statistics recorded at training time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Normalization {
    pub mean: Vec<f32>,
    pub var: Vec<f32>,
}

impl Normalization {
    pub fn identity(len: usize) -> Self {
        Self {
            mean: vec![0.0; len],
            var: vec![1.0; len],
        }
    }

    fn validate(&self, observation_size: usize) -> Result<(), LoadError> {
        for stats in [&self.mean, &self.var] {
            if stats.len() != observation_size {
                return Err(LoadError::NormalizationMismatch {
                    expected: observation_size,
                    found: stats.len(),
                });
            }
        }
        if self.mean.iter().chain(&self.var).any(|v| !v.is_finite()) {
            return Err(LoadError::NonFiniteParameters);
        }
        if self.var.iter().any(|v| *v < 0.0) {
            return Err(LoadError::Corrupt("negative variance in normalization".to_string()));
        }
        Ok(())
    }
}

/// On-disk envelope
#[derive(Debug, Serialize, Deserialize)]
struct PolicyArtifact {
    format: String,
    version: u32,
    observation_size: usize,
    action_count: usize,
    hidden: Vec<usize>,
    normalization: Normalization,
    /// `PolicyNet` record, named MessagePack
    weights: Vec<u8>,
}

#[derive(Debug)]
struct Network {
    net: PolicyNet<PolicyBackend>,
    mean: Tensor<PolicyBackend, 1>,
    std: Tensor<PolicyBackend, 1>,
}

/// Immutable trained policy, shareable across agents
#[derive(Debug)]
pub struct Policy {
    observation_size: usize,
    hidden: Vec<usize>,
    normalization: Normalization,
    network: Mutex<Network>,
}

impl Policy {
    /// Builds a policy from explicit layer weights, validating every shape
    pub fn new(
        observation_size: usize,
        normalization: Normalization,
        layers: Vec<LayerWeights>,
    ) -> Result<Self, LoadError> {
        normalization.validate(observation_size)?;
        let hidden = validate_layers(&layers, observation_size)?;

        let device = device();
        let (last, hidden_layers) = layers.split_last().ok_or_else(no_layers)?;
        let net = PolicyNet {
            hidden: hidden_layers
                .iter()
                .map(|layer| layer.clone().into_linear::<PolicyBackend>(&device))
                .collect(),
            output: last.clone().into_linear::<PolicyBackend>(&device),
        };
        Ok(Self::assemble(observation_size, hidden, normalization, net))
    }

    /// Loads and validates an artifact against the encoder's observation length
    pub fn load(path: &Path, expected_obs_len: usize) -> Result<Self, LoadError> {
        let text = fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let policy = Self::from_json(&text, expected_obs_len)?;
        info!(
            "Loaded policy from {} (hidden {:?}, {} parameters)",
            path.display(),
            policy.hidden,
            policy.parameter_count()
        );
        Ok(policy)
    }

    pub fn from_json(text: &str, expected_obs_len: usize) -> Result<Self, LoadError> {
        let artifact: PolicyArtifact =
            serde_json::from_str(text).map_err(|e| LoadError::Corrupt(e.to_string()))?;
        Self::from_artifact(artifact, expected_obs_len)
    }

    fn from_artifact(artifact: PolicyArtifact, expected_obs_len: usize) -> Result<Self, LoadError> {
        if artifact.format != POLICY_FORMAT {
            return Err(LoadError::UnsupportedFormat(artifact.format));
        }
        if artifact.version != POLICY_VERSION {
            return Err(LoadError::UnsupportedVersion {
                found: artifact.version,
                expected: POLICY_VERSION,
            });
        }
        if artifact.observation_size != expected_obs_len {
            return Err(LoadError::ObservationSizeMismatch {
                expected: expected_obs_len,
                found: artifact.observation_size,
            });
        }
        if artifact.action_count != NUM_ACTIONS {
            return Err(LoadError::ActionCountMismatch {
                expected: NUM_ACTIONS,
                found: artifact.action_count,
            });
        }
        if let Some(index) = artifact.hidden.iter().position(|&size| size == 0) {
            return Err(LoadError::LayerShape {
                index,
                reason: "layer has no outputs".to_string(),
            });
        }
        artifact.normalization.validate(artifact.observation_size)?;

        let device = device();
        let record: PolicyNetRecord<PolicyBackend> =
            Recorder::<PolicyBackend>::load(&Recording::default(), artifact.weights, &device)
                .map_err(|e| LoadError::Corrupt(format!("unreadable weights: {e:?}")))?;
        validate_record(&record, artifact.observation_size, &artifact.hidden)?;

        let net = PolicyNet::new(&device, artifact.observation_size, &artifact.hidden)
            .load_record(record);
        Ok(Self::assemble(
            artifact.observation_size,
            artifact.hidden,
            artifact.normalization,
            net,
        ))
    }

    fn assemble(
        observation_size: usize,
        hidden: Vec<usize>,
        normalization: Normalization,
        net: PolicyNet<PolicyBackend>,
    ) -> Self {
        let device = device();
        let mean = Tensor::<PolicyBackend, 1>::from_floats(normalization.mean.as_slice(), &device);
        let std = Tensor::<PolicyBackend, 1>::from_floats(normalization.var.as_slice(), &device)
            .add_scalar(NORM_EPSILON)
            .sqrt();
        Self {
            observation_size,
            hidden,
            normalization,
            network: Mutex::new(Network { net, mean, std }),
        }
    }

    /// Seeded random initialization (He-uniform hidden layers, linear head)
    pub fn random(observation_size: usize, hidden: &[usize], seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let device = device();
        let mut input = observation_size;
        let mut layers = Vec::with_capacity(hidden.len() + 1);
        for &output in hidden.iter().chain(std::iter::once(&NUM_ACTIONS)) {
            let limit = (6.0 / input.max(1) as f32).sqrt();
            let weights: Vec<Vec<f32>> = (0..input)
                .map(|_| (0..output).map(|_| rng.random_range(-limit..limit)).collect())
                .collect();
            layers.push(
                LayerWeights {
                    weights,
                    bias: vec![0.0; output],
                }
                .into_linear::<PolicyBackend>(&device),
            );
            input = output;
        }

        let output = layers.pop();
        let net = PolicyNet {
            hidden: layers,
            output: output.unwrap_or_else(|| LinearConfig::new(input, NUM_ACTIONS).init(&device)),
        };
        Self::assemble(
            observation_size,
            hidden.to_vec(),
            Normalization::identity(observation_size),
            net,
        )
    }

    pub fn observation_size(&self) -> usize {
        self.observation_size
    }

    pub fn hidden_sizes(&self) -> &[usize] {
        &self.hidden
    }

    pub fn parameter_count(&self) -> usize {
        let mut input = self.observation_size;
        let mut count = 0;
        for &output in self.hidden.iter().chain(std::iter::once(&NUM_ACTIONS)) {
            count += input * output + output;
            input = output;
        }
        count
    }

    /// Action logits for an observation of `observation_size` values
    pub fn logits(&self, obs: &[f32]) -> Result<Vec<f32>, InferenceError> {
        if obs.len() != self.observation_size {
            return Err(InferenceError::ShapeMismatch {
                expected: self.observation_size,
                found: obs.len(),
            });
        }
        let network = self.network();
        let device = network.mean.device();
        let x = Tensor::<PolicyBackend, 1>::from_floats(obs, &device);
        let x = ((x - network.mean.clone()) / network.std.clone()).reshape([1, obs.len()]);

        network
            .net
            .forward(x)
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| InferenceError::Backend(format!("{e:?}")))
    }

    /// Serialized artifact
    pub fn to_json(&self) -> Result<String, SaveError> {
        let record = self.network().net.clone().into_record();
        let weights = Recorder::<PolicyBackend>::record(&Recording::default(), record, ())
            .map_err(|e| SaveError::Record(format!("{e:?}")))?;
        let artifact = PolicyArtifact {
            format: POLICY_FORMAT.to_string(),
            version: POLICY_VERSION,
            observation_size: self.observation_size,
            action_count: NUM_ACTIONS,
            hidden: self.hidden.clone(),
            normalization: self.normalization.clone(),
            weights,
        };
        Ok(serde_json::to_string(&artifact)?)
    }

    /// Writes the artifact through a temp file in the destination directory,
    /// then renames it over `path`
    pub fn save_atomic(&self, path: &Path) -> Result<(), SaveError> {
        let json = self.to_json()?;

        let io_err = |source: std::io::Error| SaveError::Io {
            path: path.to_path_buf(),
            source,
        };
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
        tmp.write_all(json.as_bytes()).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(path).map_err(|e| io_err(e.error))?;

        info!("Saved policy to {}", path.display());
        Ok(())
    }

    // Inference never mutates the network, so a poisoned lock is still usable
    fn network(&self) -> MutexGuard<'_, Network> {
        self.network.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn no_layers() -> LoadError {
    LoadError::LayerShape {
        index: 0,
        reason: "policy has no layers".to_string(),
    }
}

/// Checks explicit weights and returns the hidden layer sizes
fn validate_layers(layers: &[LayerWeights], observation_size: usize) -> Result<Vec<usize>, LoadError> {
    if layers.is_empty() {
        return Err(no_layers());
    }

    let mut expected_input = observation_size;
    for (index, layer) in layers.iter().enumerate() {
        let outputs = layer.bias.len();
        if outputs == 0 {
            return Err(LoadError::LayerShape {
                index,
                reason: "layer has no outputs".to_string(),
            });
        }
        if layer.weights.len() != expected_input {
            return Err(LoadError::LayerShape {
                index,
                reason: format!("{} weight rows, expected {}", layer.weights.len(), expected_input),
            });
        }
        if let Some(row) = layer.weights.iter().find(|row| row.len() != outputs) {
            return Err(LoadError::LayerShape {
                index,
                reason: format!("weight row has {} outputs, bias has {}", row.len(), outputs),
            });
        }
        if layer.weights.iter().flatten().chain(&layer.bias).any(|v| !v.is_finite()) {
            return Err(LoadError::NonFiniteParameters);
        }
        expected_input = outputs;
    }

    if expected_input != NUM_ACTIONS {
        return Err(LoadError::ActionCountMismatch {
            expected: NUM_ACTIONS,
            found: expected_input,
        });
    }
    Ok(layers[..layers.len() - 1].iter().map(|l| l.bias.len()).collect())
}

/// Checks a decoded record against the envelope's declared shapes
fn validate_record(
    record: &PolicyNetRecord<PolicyBackend>,
    observation_size: usize,
    hidden: &[usize],
) -> Result<(), LoadError> {
    if record.hidden.len() != hidden.len() {
        return Err(LoadError::LayerShape {
            index: record.hidden.len().min(hidden.len()),
            reason: format!(
                "weights hold {} hidden layers, header declares {}",
                record.hidden.len(),
                hidden.len()
            ),
        });
    }

    let mut input = observation_size;
    let outputs = hidden.iter().copied().chain(std::iter::once(NUM_ACTIONS));
    let layers = record.hidden.iter().chain(std::iter::once(&record.output));
    for (index, (layer, output)) in layers.zip(outputs).enumerate() {
        check_linear(layer, index, input, output)?;
        input = output;
    }
    Ok(())
}

fn check_linear(
    layer: &LinearRecord<PolicyBackend>,
    index: usize,
    input: usize,
    output: usize,
) -> Result<(), LoadError> {
    let weight = layer.weight.val();
    if weight.dims() != [input, output] {
        return Err(LoadError::LayerShape {
            index,
            reason: format!("weight is {:?}, expected [{}, {}]", weight.dims(), input, output),
        });
    }
    let Some(bias) = layer.bias.as_ref().map(|b| b.val()) else {
        return Err(LoadError::LayerShape {
            index,
            reason: "layer has no bias".to_string(),
        });
    };
    if bias.dims() != [output] {
        return Err(LoadError::LayerShape {
            index,
            reason: format!("bias is {:?}, expected [{}]", bias.dims(), output),
        });
    }

    let finite = |data: TensorData| {
        data.to_vec::<f32>()
            .map(|values| values.iter().all(|v| v.is_finite()))
            .map_err(|e| LoadError::Corrupt(format!("layer {index}: {e:?}")))
    };
    if !finite(weight.into_data())? || !finite(bias.into_data())? {
        return Err(LoadError::NonFiniteParameters);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One linear layer where the first observation value feeds `favored`
    fn single_layer(obs: usize, favored: usize) -> Vec<LayerWeights> {
        let mut weights = vec![vec![0.0; NUM_ACTIONS]; obs];
        weights[0][favored] = 1.0;
        vec![LayerWeights {
            weights,
            bias: vec![0.0; NUM_ACTIONS],
        }]
    }

    fn same_logits(a: &Policy, b: &Policy, obs: usize) -> bool {
        (0..4).all(|k| {
            let x: Vec<f32> = (0..obs).map(|i| ((i + k) % 5) as f32 * 0.3 - 0.6).collect();
            a.logits(&x).unwrap() == b.logits(&x).unwrap()
        })
    }

    #[test]
    fn test_random_policy_shapes() {
        let policy = Policy::random(10, &[16, 8], 7);
        assert_eq!(policy.observation_size(), 10);
        assert_eq!(policy.hidden_sizes(), &[16, 8]);
        assert_eq!(policy.logits(&[0.5; 10]).unwrap().len(), NUM_ACTIONS);
        assert_eq!(
            policy.parameter_count(),
            10 * 16 + 16 + 16 * 8 + 8 + 8 * NUM_ACTIONS + NUM_ACTIONS
        );
    }

    #[test]
    fn test_random_policy_is_seeded() {
        assert!(same_logits(&Policy::random(5, &[4], 3), &Policy::random(5, &[4], 3), 5));
        assert!(!same_logits(&Policy::random(5, &[4], 3), &Policy::random(5, &[4], 4), 5));
    }

    #[test]
    fn test_logits_follow_weights() {
        let policy = Policy::new(3, Normalization::identity(3), single_layer(3, 5)).unwrap();
        let logits = policy.logits(&[1.0, 0.0, 0.0]).unwrap();
        assert!((logits[5] - 1.0).abs() < 1e-6);
        assert!(logits.iter().enumerate().all(|(i, v)| i == 5 || v.abs() < 1e-6));
    }

    #[test]
    fn test_relu_between_layers() {
        let mut head = vec![vec![0.0; NUM_ACTIONS]];
        head[0][3] = 1.0;
        let layers = vec![
            LayerWeights {
                weights: vec![vec![1.0]],
                bias: vec![0.0],
            },
            LayerWeights {
                weights: head,
                bias: vec![0.0; NUM_ACTIONS],
            },
        ];
        let policy = Policy::new(1, Normalization::identity(1), layers).unwrap();
        assert_eq!(policy.hidden_sizes(), &[1]);
        assert!(policy.logits(&[-2.0]).unwrap().iter().all(|v| v.abs() < 1e-6));
        assert!((policy.logits(&[2.0]).unwrap()[3] - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_normalization_applied() {
        let norm = Normalization {
            mean: vec![1.0],
            var: vec![4.0],
        };
        let policy = Policy::new(1, norm, single_layer(1, 0)).unwrap();
        let logits = policy.logits(&[5.0]).unwrap();
        assert!((logits[0] - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.json");
        let policy = Policy::random(6, &[4], 11);
        policy.save_atomic(&path).unwrap();
        let loaded = Policy::load(&path, 6).unwrap();
        assert_eq!(loaded.hidden_sizes(), policy.hidden_sizes());
        assert!(same_logits(&loaded, &policy, 6));
    }

    #[test]
    fn test_save_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.json");
        Policy::random(6, &[4], 1).save_atomic(&path).unwrap();
        let second = Policy::random(6, &[4], 2);
        second.save_atomic(&path).unwrap();
        assert!(same_logits(&Policy::load(&path, 6).unwrap(), &second, 6));
        // Only the artifact remains; the temp file was renamed away
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Policy::load(&dir.path().join("absent.json"), 4).unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));
    }

    #[test]
    fn test_corrupt_content() {
        assert!(matches!(Policy::from_json("{not json", 4), Err(LoadError::Corrupt(_))));
    }

    #[test]
    fn test_corrupt_weights() {
        let json = Policy::random(4, &[3], 0).to_json().unwrap();
        let mut value: serde_json::Value = serde_json::from_str(&json).unwrap();
        value["weights"] = serde_json::json!([1, 2, 3]);
        assert!(matches!(
            Policy::from_json(&value.to_string(), 4),
            Err(LoadError::Corrupt(_))
        ));
    }

    #[test]
    fn test_header_must_match_weights() {
        let json = Policy::random(6, &[4], 0).to_json().unwrap();
        let mut value: serde_json::Value = serde_json::from_str(&json).unwrap();
        value["hidden"] = serde_json::json!([5]);
        assert!(matches!(
            Policy::from_json(&value.to_string(), 6),
            Err(LoadError::LayerShape { index: 0, .. })
        ));

        let mut value: serde_json::Value = serde_json::from_str(&json).unwrap();
        value["hidden"] = serde_json::json!([4, 4]);
        assert!(matches!(
            Policy::from_json(&value.to_string(), 6),
            Err(LoadError::LayerShape { .. })
        ));
    }

    #[test]
    fn test_rejects_wrong_format_and_version() {
        let json = Policy::random(4, &[], 0).to_json().unwrap();
        let mut value: serde_json::Value = serde_json::from_str(&json).unwrap();
        value["format"] = "something-else".into();
        assert!(matches!(
            Policy::from_json(&value.to_string(), 4),
            Err(LoadError::UnsupportedFormat(_))
        ));

        let mut value: serde_json::Value = serde_json::from_str(&json).unwrap();
        value["version"] = 9.into();
        assert!(matches!(
            Policy::from_json(&value.to_string(), 4),
            Err(LoadError::UnsupportedVersion { found: 9, expected: POLICY_VERSION })
        ));
    }

    #[test]
    fn test_rejects_observation_size_mismatch() {
        let json = Policy::random(4, &[3], 0).to_json().unwrap();
        assert!(matches!(
            Policy::from_json(&json, 5),
            Err(LoadError::ObservationSizeMismatch { expected: 5, found: 4 })
        ));
    }

    #[test]
    fn test_rejects_bad_layer_shapes() {
        let mut layers = single_layer(3, 0);
        layers[0].weights[2] = vec![0.0; 2];
        let err = Policy::new(3, Normalization::identity(3), layers).unwrap_err();
        assert!(matches!(err, LoadError::LayerShape { index: 0, .. }));

        let layers = vec![LayerWeights {
            weights: vec![vec![0.0; 4]; 3],
            bias: vec![0.0; 4],
        }];
        let err = Policy::new(3, Normalization::identity(3), layers).unwrap_err();
        assert!(matches!(err, LoadError::ActionCountMismatch { expected: 18, found: 4 }));
    }

    #[test]
    fn test_rejects_normalization_mismatch() {
        let err = Policy::new(3, Normalization::identity(2), single_layer(3, 0)).unwrap_err();
        assert!(matches!(err, LoadError::NormalizationMismatch { expected: 3, found: 2 }));
    }

    #[test]
    fn test_rejects_non_finite_weights() {
        let mut layers = single_layer(3, 0);
        layers[0].bias[4] = f32::NAN;
        let err = Policy::new(3, Normalization::identity(3), layers).unwrap_err();
        assert!(matches!(err, LoadError::NonFiniteParameters));
    }
}
