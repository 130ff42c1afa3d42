//! Dual-branch regression CNN.
//!
//! Image branch: conv blocks → global average pool → optional bottleneck.
//! Tabular branch: room-type embedding ⧺ standardized scalars → optional
//! hidden layer. Head: concat → linear → ReLU → dropout → linear. An optional
//! shortcut reads the raw tabular concat and adds its scalar to the head.
//!
//! Each optional stage is its own enum so a variant is assembled once from
//! the checkpoint config instead of being re-decided on every forward pass.
//! Parameter names follow the exporter's state-dict layout so checkpoints load
//! without renaming.

use candle_core::{Module, ModuleT, Tensor};
use candle_nn::{BatchNorm, BatchNormConfig, Conv2d, Conv2dConfig, Dropout, Embedding, Linear, VarBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SurrogateError};
use crate::features::TabularLayout;
use crate::room::RoomType;

/// Width of the shortcut network's hidden layer.
pub const SKIP_HIDDEN: usize = 32;
const KERNEL: usize = 3;
const BN_EPS: f64 = 1e-5;

/// Architecture hyperparameters stored in every checkpoint. Absent fields
/// take the documented defaults (the first published model's settings).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "ModelConfig::default_n_room_types")]
    pub n_room_types: usize,
    #[serde(default = "ModelConfig::default_embed_dim")]
    pub embed_dim: usize,
    #[serde(default = "ModelConfig::default_n_tabular")]
    pub n_tabular: usize,
    #[serde(default = "ModelConfig::default_channels")]
    pub channels: Vec<usize>,
    #[serde(default = "ModelConfig::default_fc_hidden")]
    pub fc_hidden: usize,
    #[serde(default = "ModelConfig::default_dropout")]
    pub dropout: f32,
    #[serde(default)]
    pub image_bottleneck: Option<usize>,
    #[serde(default)]
    pub tabular_hidden: Option<usize>,
    #[serde(default)]
    pub tabular_skip: bool,
}

impl ModelConfig {
    const fn default_n_room_types() -> usize {
        RoomType::COUNT
    }
    const fn default_embed_dim() -> usize {
        16
    }
    const fn default_n_tabular() -> usize {
        3
    }
    fn default_channels() -> Vec<usize> {
        vec![32, 64, 128, 256]
    }
    const fn default_fc_hidden() -> usize {
        128
    }
    const fn default_dropout() -> f32 {
        0.3
    }

    /// Rejects configurations this builder cannot reconstruct.
    pub fn validate(&self) -> Result<TabularLayout> {
        let layout = TabularLayout::from_width(self.n_tabular)?;
        let bad = |msg: String| Err(SurrogateError::Config(msg));
        if self.n_room_types < RoomType::COUNT {
            return bad(format!(
                "n_room_types={} cannot embed all {} room types",
                self.n_room_types,
                RoomType::COUNT
            ));
        }
        if self.channels.is_empty() || self.channels.contains(&0) {
            return bad(format!("invalid channel widths {:?}", self.channels));
        }
        if self.embed_dim == 0 || self.fc_hidden == 0 {
            return bad("embed_dim and fc_hidden must be positive".to_string());
        }
        if self.image_bottleneck == Some(0) || self.tabular_hidden == Some(0) {
            return bad("optional layer widths must be positive when present".to_string());
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return bad(format!("dropout={} outside [0, 1)", self.dropout));
        }
        Ok(layout)
    }

    pub fn variant(&self) -> ArchitectureVariant {
        ArchitectureVariant {
            image_bottleneck: self.image_bottleneck,
            tabular_hidden: self.tabular_hidden,
            tabular_skip: self.tabular_skip,
        }
    }

    fn pooled_dim(&self) -> usize {
        self.channels.last().copied().unwrap_or(0)
    }

    fn tabular_raw_dim(&self) -> usize {
        self.embed_dim + self.n_tabular
    }

    fn fc_in(&self) -> usize {
        self.image_bottleneck.unwrap_or(self.pooled_dim())
            + self.tabular_hidden.unwrap_or(self.tabular_raw_dim())
    }

    /// Every tensor the configured architecture reads, with its shape.
    pub fn parameter_shapes(&self) -> Vec<(String, Vec<usize>)> {
        let mut shapes = Vec::new();
        let mut linear = |prefix: &str, inp: usize, out: usize| {
            shapes.push((format!("{prefix}.weight"), vec![out, inp]));
            shapes.push((format!("{prefix}.bias"), vec![out]));
        };
        let mut in_c = 3;
        let mut conv = Vec::new();
        for (i, &out_c) in self.channels.iter().enumerate() {
            conv.push((format!("conv.{}.weight", 4 * i), vec![out_c, in_c, KERNEL, KERNEL]));
            conv.push((format!("conv.{}.bias", 4 * i), vec![out_c]));
            for name in ["weight", "bias", "running_mean", "running_var"] {
                conv.push((format!("conv.{}.{name}", 4 * i + 1), vec![out_c]));
            }
            in_c = out_c;
        }
        if let Some(b) = self.image_bottleneck {
            linear("image_fc.0", self.pooled_dim(), b);
        }
        if let Some(h) = self.tabular_hidden {
            linear("tabular_fc.0", self.tabular_raw_dim(), h);
        }
        linear("head.0", self.fc_in(), self.fc_hidden);
        linear("head.3", self.fc_hidden, 1);
        if self.tabular_skip {
            linear("skip_head.0", self.tabular_raw_dim(), SKIP_HIDDEN);
            linear("skip_head.2", SKIP_HIDDEN, 1);
        }
        shapes.extend(conv);
        shapes.push((
            "room_embed.weight".to_string(),
            vec![self.n_room_types, self.embed_dim],
        ));
        shapes
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            n_room_types: Self::default_n_room_types(),
            embed_dim: Self::default_embed_dim(),
            n_tabular: Self::default_n_tabular(),
            channels: Self::default_channels(),
            fc_hidden: Self::default_fc_hidden(),
            dropout: Self::default_dropout(),
            image_bottleneck: None,
            tabular_hidden: None,
            tabular_skip: false,
        }
    }
}

/// Which optional stages a model carries.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ArchitectureVariant {
    pub image_bottleneck: Option<usize>,
    pub tabular_hidden: Option<usize>,
    pub tabular_skip: bool,
}

impl ArchitectureVariant {
    pub fn describe(&self) -> String {
        let image = match self.image_bottleneck {
            Some(b) => format!("image bottleneck {b}"),
            None => "pooled image".to_string(),
        };
        let tabular = match self.tabular_hidden {
            Some(h) => format!("tabular hidden {h}"),
            None => "raw tabular".to_string(),
        };
        let skip = if self.tabular_skip { " + tabular shortcut" } else { "" };
        format!("{image}, {tabular}{skip}")
    }
}

struct ConvBlock {
    conv: Conv2d,
    bn: BatchNorm,
}

impl ConvBlock {
    fn load(in_c: usize, out_c: usize, index: usize, vb: &VarBuilder) -> candle_core::Result<Self> {
        let cfg = Conv2dConfig {
            padding: 1,
            ..Default::default()
        };
        let conv = candle_nn::conv2d(in_c, out_c, KERNEL, cfg, vb.pp(4 * index))?;
        let bn_cfg = BatchNormConfig {
            eps: BN_EPS,
            ..Default::default()
        };
        let bn = candle_nn::batch_norm(out_c, bn_cfg, vb.pp(4 * index + 1))?;
        Ok(Self { conv, bn })
    }
}

impl Module for ConvBlock {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let xs = self.conv.forward(xs)?;
        // running statistics only; inference never updates them
        let xs = self.bn.forward_t(&xs, false)?;
        xs.relu()?.max_pool2d(2)
    }
}

pub enum ImageProjection {
    Pooled,
    Bottleneck(Linear),
}

impl Module for ImageProjection {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        match self {
            Self::Pooled => Ok(xs.clone()),
            Self::Bottleneck(fc) => fc.forward(xs)?.relu(),
        }
    }
}

pub struct ImageBranch {
    blocks: Vec<ConvBlock>,
    projection: ImageProjection,
}

impl ImageBranch {
    fn load(cfg: &ModelConfig, vb: &VarBuilder) -> candle_core::Result<Self> {
        let conv_vb = vb.pp("conv");
        let mut blocks = Vec::with_capacity(cfg.channels.len());
        let mut in_c = 3;
        for (i, &out_c) in cfg.channels.iter().enumerate() {
            blocks.push(ConvBlock::load(in_c, out_c, i, &conv_vb)?);
            in_c = out_c;
        }
        let projection = match cfg.image_bottleneck {
            Some(width) => ImageProjection::Bottleneck(candle_nn::linear(
                cfg.pooled_dim(),
                width,
                vb.pp("image_fc").pp(0),
            )?),
            None => ImageProjection::Pooled,
        };
        Ok(Self { blocks, projection })
    }
}

impl Module for ImageBranch {
    /// (B, 3, H, W) → (B, pooled or bottleneck width)
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let mut xs = xs.clone();
        for block in &self.blocks {
            xs = block.forward(&xs)?;
        }
        let pooled = xs.mean((2, 3))?;
        self.projection.forward(&pooled)
    }
}

pub enum TabularProjection {
    Raw,
    Hidden(Linear),
}

impl Module for TabularProjection {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        match self {
            Self::Raw => Ok(xs.clone()),
            Self::Hidden(fc) => fc.forward(xs)?.relu(),
        }
    }
}

pub struct TabularBranch {
    embedding: Embedding,
    projection: TabularProjection,
}

impl TabularBranch {
    fn load(cfg: &ModelConfig, vb: &VarBuilder) -> candle_core::Result<Self> {
        let table = vb
            .pp("room_embed")
            .get((cfg.n_room_types, cfg.embed_dim), "weight")?;
        let embedding = Embedding::new(table, cfg.embed_dim);
        let projection = match cfg.tabular_hidden {
            Some(width) => TabularProjection::Hidden(candle_nn::linear(
                cfg.tabular_raw_dim(),
                width,
                vb.pp("tabular_fc").pp(0),
            )?),
            None => TabularProjection::Raw,
        };
        Ok(Self {
            embedding,
            projection,
        })
    }

    /// Embedding ⧺ scalars, before any projection: (B, embed + n_tabular).
    pub fn raw(&self, room_type_idx: &Tensor, tabular: &Tensor) -> candle_core::Result<Tensor> {
        let emb = self.embedding.forward(room_type_idx)?;
        Tensor::cat(&[&emb, tabular], 1)
    }

    pub fn project(&self, raw: &Tensor) -> candle_core::Result<Tensor> {
        self.projection.forward(raw)
    }
}

pub struct FusionHead {
    hidden: Linear,
    dropout: Dropout,
    out: Linear,
}

impl FusionHead {
    fn load(cfg: &ModelConfig, vb: &VarBuilder) -> candle_core::Result<Self> {
        let vb = vb.pp("head");
        Ok(Self {
            hidden: candle_nn::linear(cfg.fc_in(), cfg.fc_hidden, vb.pp(0))?,
            dropout: Dropout::new(cfg.dropout),
            out: candle_nn::linear(cfg.fc_hidden, 1, vb.pp(3))?,
        })
    }
}

impl Module for FusionHead {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let xs = self.hidden.forward(xs)?.relu()?;
        let xs = self.dropout.forward(&xs, false)?;
        self.out.forward(&xs)
    }
}

pub struct SkipHead {
    hidden: Linear,
    out: Linear,
}

impl Module for SkipHead {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        self.out.forward(&self.hidden.forward(xs)?.relu()?)
    }
}

pub enum Shortcut {
    Disabled,
    Enabled(SkipHead),
}

impl Shortcut {
    fn load(cfg: &ModelConfig, vb: &VarBuilder) -> candle_core::Result<Self> {
        if !cfg.tabular_skip {
            return Ok(Self::Disabled);
        }
        let vb = vb.pp("skip_head");
        Ok(Self::Enabled(SkipHead {
            hidden: candle_nn::linear(cfg.tabular_raw_dim(), SKIP_HIDDEN, vb.pp(0))?,
            out: candle_nn::linear(SKIP_HIDDEN, 1, vb.pp(2))?,
        }))
    }

    /// Adds the shortcut's scalar (computed from the raw tabular concat).
    pub fn apply(&self, head_out: Tensor, tabular_raw: &Tensor) -> candle_core::Result<Tensor> {
        match self {
            Self::Disabled => Ok(head_out),
            Self::Enabled(skip) => head_out.add(&skip.forward(tabular_raw)?),
        }
    }
}

/// The assembled network, evaluation mode only.
pub struct RoomCnn {
    config: ModelConfig,
    image: ImageBranch,
    tabular: TabularBranch,
    head: FusionHead,
    shortcut: Shortcut,
}

impl RoomCnn {
    /// Rebuilds the exact architecture described by `config` and binds its
    /// weights from `vb`.
    pub fn load(config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: config.clone(),
            image: ImageBranch::load(config, &vb)?,
            tabular: TabularBranch::load(config, &vb)?,
            head: FusionHead::load(config, &vb)?,
            shortcut: Shortcut::load(config, &vb)?,
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn variant(&self) -> ArchitectureVariant {
        self.config.variant()
    }

    /// * `image`: (B, 3, 64, 64) f32 in [0, 1]
    /// * `room_type_idx`: (B,) u32
    /// * `tabular`: (B, n_tabular) f32
    ///
    /// Returns (B, 1).
    pub fn forward(
        &self,
        image: &Tensor,
        room_type_idx: &Tensor,
        tabular: &Tensor,
    ) -> candle_core::Result<Tensor> {
        let img = self.image.forward(image)?;
        let tab_raw = self.tabular.raw(room_type_idx, tabular)?;
        let tab = self.tabular.project(&tab_raw)?;
        let combined = Tensor::cat(&[&img, &tab], 1)?;
        let out = self.head.forward(&combined)?;
        self.shortcut.apply(out, &tab_raw)
    }
}
