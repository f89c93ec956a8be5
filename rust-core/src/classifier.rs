//! Activity classifiers over [`FeatureVector`]s.
//!
//! Both classifiers are built from a [`LabeledModel`], an immutable list of
//! training vectors and their labels. Model files are JSON:
//!
//! ```json
//! [
//!   { "features": [0.1, 0.2, 0.3, 9.8, 0.01, 0.02, 0.0, 0.0], "label": "STATIONARY" },
//!   { "features": [2.1, 4.0, 1.3, 9.9, 0.90, 1.80, 0.4, 0.9], "label": "WALKING" }
//! ]
//! ```

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SensingError};
use crate::types::{ActivityLabel, FeatureVector, FEATURE_COUNT};

/// Floor applied to per-feature variances so constant training features do
/// not produce infinite log-likelihoods.
pub const VARIANCE_FLOOR: f64 = 1e-9;

/// Maps a feature vector to an activity label.
pub trait Classifier: Send {
    fn classify(&self, features: &FeatureVector) -> ActivityLabel;

    fn name(&self) -> &'static str;
}

/// Which classifier the pipeline builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierKind {
    #[default]
    NearestNeighbour,
    NaiveBayes,
}

/// One serialized model row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    pub features: Vec<f64>,
    pub label: String,
}

/// Validated training set.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledModel {
    entries: Vec<(FeatureVector, ActivityLabel)>,
}

impl LabeledModel {
    /// Validate and build a model.
    ///
    /// Every label must name an [`ActivityLabel`], every row must have
    /// exactly 8 finite features, and the model must not be empty.
    pub fn from_entries(entries: Vec<ModelEntry>) -> Result<Self> {
        if entries.is_empty() {
            return Err(SensingError::invalid_model("model has no entries"));
        }
        let mut validated = Vec::with_capacity(entries.len());
        for (index, entry) in entries.into_iter().enumerate() {
            let label: ActivityLabel = entry
                .label
                .parse()
                .map_err(|_| SensingError::UnknownLabel {
                    index,
                    label: entry.label.clone(),
                })?;
            if entry.features.len() != FEATURE_COUNT {
                return Err(SensingError::invalid_model(format!(
                    "entry {} has {} features, expected {}",
                    index,
                    entry.features.len(),
                    FEATURE_COUNT
                )));
            }
            let mut values = [0.0; FEATURE_COUNT];
            values.copy_from_slice(&entry.features);
            let features = FeatureVector::new(values);
            if !features.is_finite() {
                return Err(SensingError::invalid_model(format!(
                    "entry {} has non-finite features",
                    index
                )));
            }
            validated.push((features, label));
        }
        debug!("loaded model with {} entries", validated.len());
        Ok(Self { entries: validated })
    }

    /// Parse a JSON model (array of `{features, label}` objects).
    pub fn from_json(json: &str) -> Result<Self> {
        let entries: Vec<ModelEntry> = serde_json::from_str(json)?;
        Self::from_entries(entries)
    }

    pub fn entries(&self) -> &[(FeatureVector, ActivityLabel)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Distinct labels in first-appearance order.
    pub fn labels(&self) -> Vec<ActivityLabel> {
        let mut labels = Vec::new();
        for (_, label) in &self.entries {
            if !labels.contains(label) {
                labels.push(*label);
            }
        }
        labels
    }
}

/// Nearest neighbour by (optionally weighted) Euclidean distance.
#[derive(Debug, Clone)]
pub struct NearestNeighbour {
    model: LabeledModel,
    weights: [f64; FEATURE_COUNT],
}

impl NearestNeighbour {
    pub fn new(model: LabeledModel) -> Self {
        Self {
            model,
            weights: [1.0; FEATURE_COUNT],
        }
    }

    /// Per-feature weights applied to squared differences.
    pub fn with_weights(model: LabeledModel, weights: [f64; FEATURE_COUNT]) -> Result<Self> {
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(SensingError::invalid_config(
                "classifier weights must be finite and non-negative",
            ));
        }
        Ok(Self { model, weights })
    }

    fn distance_sq(&self, a: &FeatureVector, b: &FeatureVector) -> f64 {
        a.values()
            .iter()
            .zip(b.values())
            .zip(&self.weights)
            .map(|((x, y), w)| w * (x - y) * (x - y))
            .sum()
    }
}

impl Classifier for NearestNeighbour {
    fn classify(&self, features: &FeatureVector) -> ActivityLabel {
        if !features.is_finite() {
            return ActivityLabel::Unknown;
        }
        let mut best = ActivityLabel::Unknown;
        let mut best_distance = f64::INFINITY;
        for (reference, label) in self.model.entries() {
            let d = self.distance_sq(features, reference);
            // Strict comparison: the first of several equal minima wins.
            if d < best_distance {
                best_distance = d;
                best = *label;
            }
        }
        best
    }

    fn name(&self) -> &'static str {
        "nearest_neighbour"
    }
}

#[derive(Debug, Clone)]
struct ClassStats {
    label: ActivityLabel,
    log_prior: f64,
    mean: [f64; FEATURE_COUNT],
    variance: [f64; FEATURE_COUNT],
}

/// Gaussian naive Bayes trained on a [`LabeledModel`].
#[derive(Debug, Clone)]
pub struct GaussianNaiveBayes {
    classes: Vec<ClassStats>,
}

impl GaussianNaiveBayes {
    pub fn train(model: &LabeledModel) -> Result<Self> {
        if model.is_empty() {
            return Err(SensingError::invalid_model("model has no entries"));
        }
        let total = model.len() as f64;
        let classes = model
            .labels()
            .into_iter()
            .map(|label| {
                let rows: Vec<&FeatureVector> = model
                    .entries()
                    .iter()
                    .filter(|(_, l)| *l == label)
                    .map(|(f, _)| f)
                    .collect();
                let n = rows.len() as f64;
                let mut mean = [0.0; FEATURE_COUNT];
                for row in &rows {
                    for (m, v) in mean.iter_mut().zip(row.values()) {
                        *m += v / n;
                    }
                }
                let mut variance = [0.0; FEATURE_COUNT];
                for row in &rows {
                    for i in 0..FEATURE_COUNT {
                        let d = row.values()[i] - mean[i];
                        variance[i] += d * d / n;
                    }
                }
                for v in variance.iter_mut() {
                    *v = v.max(VARIANCE_FLOOR);
                }
                ClassStats {
                    label,
                    log_prior: (n / total).ln(),
                    mean,
                    variance,
                }
            })
            .collect();
        Ok(Self { classes })
    }

    fn log_posterior(class: &ClassStats, features: &FeatureVector) -> f64 {
        let mut total = class.log_prior;
        for i in 0..FEATURE_COUNT {
            let var = class.variance[i];
            let d = features.values()[i] - class.mean[i];
            total -= 0.5 * (2.0 * std::f64::consts::PI * var).ln() + d * d / (2.0 * var);
        }
        total
    }
}

impl Classifier for GaussianNaiveBayes {
    fn classify(&self, features: &FeatureVector) -> ActivityLabel {
        if !features.is_finite() {
            return ActivityLabel::Unknown;
        }
        let mut best = ActivityLabel::Unknown;
        let mut best_score = f64::NEG_INFINITY;
        for class in &self.classes {
            let score = Self::log_posterior(class, features);
            if score > best_score {
                best_score = score;
                best = class.label;
            }
        }
        best
    }

    fn name(&self) -> &'static str {
        "naive_bayes"
    }
}

/// Build the configured classifier.
pub fn build(
    kind: ClassifierKind,
    model: LabeledModel,
    weights: Option<[f64; FEATURE_COUNT]>,
) -> Result<Box<dyn Classifier>> {
    Ok(match kind {
        ClassifierKind::NearestNeighbour => match weights {
            Some(w) => Box::new(NearestNeighbour::with_weights(model, w)?),
            None => Box::new(NearestNeighbour::new(model)),
        },
        ClassifierKind::NaiveBayes => Box::new(GaussianNaiveBayes::train(&model)?),
    })
}

/// Small hand-tuned reference model covering the main activities.
pub fn default_model() -> LabeledModel {
    let rows: [([f64; FEATURE_COUNT], ActivityLabel); 5] = [
        ([0.05, 0.05, 0.02, 9.81, 0.01, 0.01, 0.0, 0.0], ActivityLabel::Stationary),
        ([3.0, 6.0, 1.5, 9.9, 0.8, 1.8, 0.3, 0.6], ActivityLabel::Walking),
        ([8.0, 18.0, 3.5, 10.2, 2.4, 5.5, 0.8, 1.6], ActivityLabel::Running),
        ([2.5, 2.0, 1.2, 9.8, 0.7, 0.5, 0.2, 0.15], ActivityLabel::Cycling),
        ([1.0, 1.2, 0.5, 9.8, 0.25, 0.3, 0.05, 0.08], ActivityLabel::Travelling),
    ];
    LabeledModel {
        entries: rows
            .iter()
            .map(|(values, label)| (FeatureVector::new(*values), *label))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(features: [f64; 8], label: &str) -> ModelEntry {
        ModelEntry {
            features: features.to_vec(),
            label: label.to_string(),
        }
    }

    fn two_class_model() -> LabeledModel {
        LabeledModel::from_entries(vec![
            entry([0.0; 8], "STATIONARY"),
            entry([0.1, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0], "STATIONARY"),
            entry([5.0; 8], "WALKING"),
            entry([5.5, 5.0, 5.0, 5.0, 5.0, 5.0, 5.0, 5.0], "WALKING"),
        ])
        .unwrap()
    }

    #[test]
    fn test_nearest_neighbour_exact_match() {
        let nn = NearestNeighbour::new(two_class_model());
        assert_eq!(nn.classify(&FeatureVector::new([5.0; 8])), ActivityLabel::Walking);
        assert_eq!(nn.classify(&FeatureVector::new([0.0; 8])), ActivityLabel::Stationary);
        assert_eq!(nn.classify(&FeatureVector::new([0.4; 8])), ActivityLabel::Stationary);
    }

    #[test]
    fn test_nearest_neighbour_tie_goes_to_first_entry() {
        let model = LabeledModel::from_entries(vec![
            entry([1.0; 8], "RUNNING"),
            entry([-1.0; 8], "CYCLING"),
        ])
        .unwrap();
        let nn = NearestNeighbour::new(model);
        assert_eq!(nn.classify(&FeatureVector::new([0.0; 8])), ActivityLabel::Running);
    }

    #[test]
    fn test_weights_change_the_winner() {
        let model = LabeledModel::from_entries(vec![
            entry([0.0, 10.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0], "WALKING"),
            entry([10.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0], "CYCLING"),
        ])
        .unwrap();
        let query = FeatureVector::new([0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);

        let mut weights = [1.0; 8];
        weights[0] = 0.1;
        let nn = NearestNeighbour::with_weights(model.clone(), weights).unwrap();
        assert_eq!(nn.classify(&query), ActivityLabel::Cycling);

        weights[0] = 1.0;
        weights[1] = 0.1;
        let nn = NearestNeighbour::with_weights(model, weights).unwrap();
        assert_eq!(nn.classify(&query), ActivityLabel::Walking);
    }

    #[test]
    fn test_non_finite_features_are_unknown() {
        let nn = NearestNeighbour::new(two_class_model());
        let mut values = [0.0; 8];
        values[3] = f64::NAN;
        assert_eq!(nn.classify(&FeatureVector::new(values)), ActivityLabel::Unknown);

        let nb = GaussianNaiveBayes::train(&two_class_model()).unwrap();
        assert_eq!(nb.classify(&FeatureVector::new(values)), ActivityLabel::Unknown);
    }

    #[test]
    fn test_naive_bayes_separates_classes() {
        let nb = GaussianNaiveBayes::train(&two_class_model()).unwrap();
        assert_eq!(nb.classify(&FeatureVector::new([0.05; 8])), ActivityLabel::Stationary);
        assert_eq!(nb.classify(&FeatureVector::new([5.2; 8])), ActivityLabel::Walking);
    }

    #[test]
    fn test_naive_bayes_prior_breaks_symmetry() {
        let model = LabeledModel::from_entries(vec![
            entry([0.0; 8], "WALKING"),
            entry([0.0; 8], "WALKING"),
            entry([0.0; 8], "RUNNING"),
        ])
        .unwrap();
        let nb = GaussianNaiveBayes::train(&model).unwrap();
        assert_eq!(nb.classify(&FeatureVector::new([0.0; 8])), ActivityLabel::Walking);
    }

    #[test]
    fn test_unknown_label_rejected() {
        let err = LabeledModel::from_entries(vec![
            entry([0.0; 8], "WALKING"),
            entry([0.0; 8], "SKATEBOARDING"),
        ])
        .unwrap_err();
        match err {
            SensingError::UnknownLabel { index, label } => {
                assert_eq!(index, 1);
                assert_eq!(label, "SKATEBOARDING");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_wrong_width_and_empty_rejected() {
        let short = ModelEntry {
            features: vec![0.0; 7],
            label: "WALKING".into(),
        };
        assert!(matches!(
            LabeledModel::from_entries(vec![short]),
            Err(SensingError::InvalidModel { .. })
        ));
        assert!(LabeledModel::from_entries(Vec::new()).is_err());
    }

    #[test]
    fn test_from_json() {
        let json = r#"[
            {"features": [0,0,0,9.8,0,0,0,0], "label": "stationary"},
            {"features": [3,6,1.5,9.9,0.8,1.8,0.3,0.6], "label": "WALKING"}
        ]"#;
        let model = LabeledModel::from_json(json).unwrap();
        assert_eq!(model.len(), 2);
        assert_eq!(model.labels(), vec![ActivityLabel::Stationary, ActivityLabel::Walking]);

        assert!(matches!(
            LabeledModel::from_json("{not json"),
            Err(SensingError::Json(_))
        ));
    }

    #[test]
    fn test_build_and_default_model() {
        let nn = build(ClassifierKind::NearestNeighbour, default_model(), None).unwrap();
        assert_eq!(nn.name(), "nearest_neighbour");
        let still = FeatureVector::new([0.0, 0.0, 0.0, 9.81, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(nn.classify(&still), ActivityLabel::Stationary);

        let nb = build(ClassifierKind::NaiveBayes, default_model(), None).unwrap();
        assert_eq!(nb.name(), "naive_bayes");

        assert!(build(ClassifierKind::NearestNeighbour, default_model(), Some([-1.0; 8])).is_err());
    }
}
