//! Field writes applied to the workflow template.
//!
//! The template is an exported ComfyUI workflow; a handful of its nodes
//! are parameterised per run or per image. [`GraphMutator`] knows which
//! node ids play which role and writes only the designated fields.
//!
//! Every write validates all the node ids it will touch before changing
//! anything, so a template that lacks a node fails without being left
//! half-modified.

use std::path::Path;

use serde_json::Value;

use crate::error::CoreError;
use crate::graph::{JobGraph, Node};
use crate::naming::filename_prefix;
use crate::variation::Variation;

/// Precision mode written into the text-encoder and decoder loaders.
pub const HALF_PRECISION: &str = "torch.float16";

/// Node ids of the parameterised nodes in the template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIds {
    /// `LoraLoader` receiving the checkpoint path.
    pub model: String,
    /// CLIP text-encoder loader.
    pub text_encoder: String,
    /// VAE decoder loader.
    pub decoder: String,
    /// Text node holding the dynamic prompt part.
    pub prompt: String,
    pub sampler: String,
    /// Save node writing the images.
    pub output: String,
}

impl Default for NodeIds {
    fn default() -> Self {
        Self {
            model: "276".into(),
            text_encoder: "11".into(),
            decoder: "500".into(),
            prompt: "285".into(),
            sampler: "291".into(),
            output: "314".into(),
        }
    }
}

impl NodeIds {
    fn all(&self) -> [(&str, &'static str); 6] {
        [
            (self.model.as_str(), "model loader"),
            (self.text_encoder.as_str(), "text encoder"),
            (self.decoder.as_str(), "decoder"),
            (self.prompt.as_str(), "prompt"),
            (self.sampler.as_str(), "sampler"),
            (self.output.as_str(), "output"),
        ]
    }
}

/// Fixed sampler parameters for the whole run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerSettings {
    pub steps: u32,
    /// Classifier-free guidance scale.
    pub cfg: f64,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            steps: 30,
            cfg: 4.0,
        }
    }
}

/// Run-wide inputs to the output node.
#[derive(Debug, Clone, Copy)]
pub struct OutputNaming<'a> {
    /// Subdirectory below the ComfyUI output root.
    pub subdirectory: &'a str,
    pub label: &'a str,
    /// LoRA checkpoint step, recorded in every filename.
    pub target_step: u32,
}

/// Writes run and iteration parameters into a [`JobGraph`].
#[derive(Debug, Clone, Default)]
pub struct GraphMutator {
    ids: NodeIds,
    sampler: SamplerSettings,
}

impl GraphMutator {
    pub fn new(ids: NodeIds, sampler: SamplerSettings) -> Self {
        Self { ids, sampler }
    }

    pub fn node_ids(&self) -> &NodeIds {
        &self.ids
    }

    /// Check that every designated node exists in `graph`.
    pub fn validate(&self, graph: &JobGraph) -> Result<(), CoreError> {
        require(graph, &self.ids.all())
    }

    /// Point the LoRA loader at `lora_path` and allow paths outside the
    /// ComfyUI model folders.
    pub fn set_model(&self, graph: &mut JobGraph, lora_path: &Path) -> Result<(), CoreError> {
        let node = node_mut(graph, &self.ids.model, "model loader")?;
        node.inputs.insert(
            "lora_name".into(),
            Value::String(lora_path.display().to_string()),
        );
        node.meta.insert("allow_custom_paths".into(), Value::Bool(true));
        Ok(())
    }

    /// Force half precision on the text encoder and decoder.
    pub fn set_half_precision(&self, graph: &mut JobGraph) -> Result<(), CoreError> {
        require(
            graph,
            &[
                (self.ids.text_encoder.as_str(), "text encoder"),
                (self.ids.decoder.as_str(), "decoder"),
            ],
        )?;
        for id in [&self.ids.text_encoder, &self.ids.decoder] {
            if let Some(node) = graph.node_mut(id) {
                node.inputs
                    .insert("dtype".into(), Value::String(HALF_PRECISION.into()));
            }
        }
        Ok(())
    }

    /// Write one iteration's prompt, sampler and output fields.
    ///
    /// Returns the filename prefix written into the output node.
    pub fn apply_variation(
        &self,
        graph: &mut JobGraph,
        variation: &Variation,
        naming: &OutputNaming<'_>,
    ) -> Result<String, CoreError> {
        require(
            graph,
            &[
                (self.ids.prompt.as_str(), "prompt"),
                (self.ids.sampler.as_str(), "sampler"),
                (self.ids.output.as_str(), "output"),
            ],
        )?;

        let prefix = filename_prefix(
            naming.label,
            naming.target_step,
            variation.ordinal(),
            variation.seed,
        );

        let prompt = node_mut(graph, &self.ids.prompt, "prompt")?;
        prompt
            .inputs
            .insert("text".into(), Value::String(variation.prompt_suffix()));

        let sampler = node_mut(graph, &self.ids.sampler, "sampler")?;
        sampler
            .inputs
            .insert("steps".into(), Value::from(self.sampler.steps));
        sampler.inputs.insert("cfg".into(), Value::from(self.sampler.cfg));
        sampler
            .inputs
            .insert("seed".into(), Value::from(variation.seed));

        let output = node_mut(graph, &self.ids.output, "output")?;
        output.inputs.insert(
            "output_path".into(),
            Value::String(naming.subdirectory.to_string()),
        );
        output
            .inputs
            .insert("filename_prefix".into(), Value::String(prefix.clone()));

        Ok(prefix)
    }
}

fn require(graph: &JobGraph, nodes: &[(&str, &'static str)]) -> Result<(), CoreError> {
    match nodes.iter().find(|(id, _)| !graph.contains(id)) {
        Some(&(id, role)) => Err(CoreError::MissingNode {
            node_id: id.to_string(),
            role,
        }),
        None => Ok(()),
    }
}

fn node_mut<'g>(
    graph: &'g mut JobGraph,
    id: &str,
    role: &'static str,
) -> Result<&'g mut Node, CoreError> {
    graph.node_mut(id).ok_or_else(|| CoreError::MissingNode {
        node_id: id.to_string(),
        role,
    })
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use serde_json::json;

    use super::*;

    fn template() -> JobGraph {
        serde_json::from_value(json!({
            "11":  {"class_type": "CLIPLoader", "inputs": {"dtype": "default", "clip_name": "t5.safetensors"}},
            "500": {"class_type": "VAELoader", "inputs": {"dtype": "default"}},
            "276": {"class_type": "LoraLoader", "inputs": {"lora_name": "old.safetensors", "strength_model": 1.0}, "_meta": {"title": "LoRA"}},
            "285": {"class_type": "Text", "inputs": {"text": ""}},
            "291": {"class_type": "KSampler", "inputs": {"steps": 20, "cfg": 7.0, "seed": 0, "sampler_name": "euler"}},
            "314": {"class_type": "SaveImage", "inputs": {"filename_prefix": "ComfyUI"}},
            "3":   {"class_type": "EmptyLatentImage", "inputs": {"width": 1024, "height": 1024}}
        }))
        .unwrap()
    }

    fn text<'g>(graph: &'g JobGraph, id: &str, field: &str) -> &'g str {
        graph.input(id, field).and_then(Value::as_str).unwrap()
    }

    fn variation(index: usize, seed: u64, defect: &str) -> Variation {
        Variation {
            index,
            defect: defect.into(),
            background: "mountainous outdoor backdrop".into(),
            seed,
        }
    }

    const NAMING: OutputNaming<'static> = OutputNaming {
        subdirectory: "2025-01-02_03-04-05",
        label: "insulator",
        target_step: 300,
    };

    #[test]
    fn default_template_validates() {
        assert!(GraphMutator::default().validate(&template()).is_ok());
    }

    #[test]
    fn set_model_writes_path_and_flag() {
        let mut graph = template();
        let mutator = GraphMutator::default();
        mutator
            .set_model(&mut graph, &PathBuf::from("/loras/run_checkpoint-300_lora.safetensors"))
            .unwrap();

        let node = graph.node("276").unwrap();
        assert_eq!(node.inputs["lora_name"], "/loras/run_checkpoint-300_lora.safetensors");
        assert_eq!(node.inputs["strength_model"], 1.0);
        assert_eq!(node.meta["allow_custom_paths"], true);
        assert_eq!(node.meta["title"], "LoRA");
    }

    #[test]
    fn half_precision_on_both_loaders() {
        let mut graph = template();
        GraphMutator::default().set_half_precision(&mut graph).unwrap();

        assert_eq!(text(&graph, "11", "dtype"), HALF_PRECISION);
        assert_eq!(text(&graph, "500", "dtype"), HALF_PRECISION);
        assert_eq!(text(&graph, "11", "clip_name"), "t5.safetensors");
    }

    #[test]
    fn apply_variation_writes_designated_fields() {
        let mut graph = template();
        let prefix = GraphMutator::default()
            .apply_variation(&mut graph, &variation(0, 123, "insulator miss_1"), &NAMING)
            .unwrap();

        assert_eq!(prefix, "insulator_step300_img0001_seed123");
        assert_eq!(
            text(&graph, "285", "text"),
            "insulator miss_1, connected to wires against mountainous outdoor backdrop,"
        );
        assert_eq!(graph.input("291", "steps").unwrap(), 30);
        assert_eq!(graph.input("291", "cfg").unwrap(), 4.0);
        assert_eq!(graph.input("291", "seed").unwrap(), 123);
        assert_eq!(text(&graph, "291", "sampler_name"), "euler");
        assert_eq!(text(&graph, "314", "output_path"), "2025-01-02_03-04-05");
        assert_eq!(text(&graph, "314", "filename_prefix"), prefix);
    }

    #[test]
    fn non_designated_nodes_untouched() {
        let original = template();
        let mut graph = original.clone();
        let mutator = GraphMutator::default();
        mutator.set_model(&mut graph, Path::new("/l.safetensors")).unwrap();
        mutator.set_half_precision(&mut graph).unwrap();
        mutator
            .apply_variation(&mut graph, &variation(4, 9, "insulator miss_3"), &NAMING)
            .unwrap();

        let designated: Vec<&str> = mutator.node_ids().all().iter().map(|(id, _)| *id).collect();
        for id in original.node_ids() {
            if !designated.contains(&id) {
                assert_eq!(graph.node(id), original.node(id), "node {id} changed");
            }
        }
        assert_eq!(graph.len(), original.len());
    }

    #[test]
    fn second_variation_leaves_no_residue() {
        let mutator = GraphMutator::default();

        let mut twice = template();
        mutator
            .apply_variation(&mut twice, &variation(0, 111, "insulator miss_1"), &NAMING)
            .unwrap();
        mutator
            .apply_variation(&mut twice, &variation(1, 222, "insulator miss_more"), &NAMING)
            .unwrap();

        let mut once = template();
        mutator
            .apply_variation(&mut once, &variation(1, 222, "insulator miss_more"), &NAMING)
            .unwrap();

        assert_eq!(twice, once);
    }

    #[test]
    fn missing_node_fails_without_partial_write() {
        let mut graph: JobGraph = serde_json::from_value(json!({
            "285": {"class_type": "Text", "inputs": {"text": "untouched"}},
            "291": {"class_type": "KSampler", "inputs": {"seed": 0}}
        }))
        .unwrap();
        let before = graph.clone();

        let err = GraphMutator::default()
            .apply_variation(&mut graph, &variation(0, 5, "insulator miss_1"), &NAMING)
            .unwrap_err();

        assert!(matches!(err, CoreError::MissingNode { ref node_id, .. } if node_id == "314"));
        assert_eq!(graph, before);
    }

    #[test]
    fn half_precision_missing_decoder_is_atomic() {
        let mut graph: JobGraph = serde_json::from_value(json!({
            "11": {"class_type": "CLIPLoader", "inputs": {"dtype": "default"}}
        }))
        .unwrap();
        let before = graph.clone();

        let err = GraphMutator::default().set_half_precision(&mut graph).unwrap_err();
        assert!(matches!(err, CoreError::MissingNode { role: "decoder", .. }));
        assert_eq!(graph, before);
    }

    #[test]
    fn validate_reports_first_missing_node() {
        let graph = JobGraph::default();
        let err = GraphMutator::default().validate(&graph).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Configuration error: template has no node 276 (model loader)"
        );
    }

    #[test]
    fn custom_node_ids() {
        let ids = NodeIds {
            sampler: "3".into(),
            ..Default::default()
        };
        let mut graph = template();
        let mutator = GraphMutator::new(ids, SamplerSettings { steps: 12, cfg: 2.5 });

        mutator
            .apply_variation(&mut graph, &variation(0, 1, "insulator miss_1"), &NAMING)
            .unwrap();
        assert_eq!(graph.input("3", "steps").unwrap(), 12);
        assert_eq!(graph.input("3", "cfg").unwrap(), 2.5);
        assert_eq!(graph.input("291", "steps").unwrap(), 20);
    }
}
