//! EfficientNet-Lite backbone
//!
//! Inverted-residual (MBConv) blocks without squeeze-and-excitation and with
//! ReLU6 activations, the variant that quantizes well for mobile deployment.
//!
//! Architecture of the `lite0` preset:
//! - Input: 224x224x3
//! - Stem: Conv 3x3 stride 2 -> 32
//! - 7 stages of MBConv blocks: 16, 24, 40, 80, 112, 192, 320 channels
//! - Head: Conv 1x1 -> 1280, global average pooling

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d,
    },
    tensor::{backend::Backend, Tensor},
};

/// One stage of identical MBConv blocks
#[derive(Config, Debug, PartialEq)]
pub struct StageConfig {
    /// Channel expansion of the inverted bottleneck
    pub expand_ratio: usize,
    /// Depthwise kernel size
    pub kernel_size: usize,
    /// Stride of the first block in the stage
    pub stride: usize,
    /// Output channels of every block in the stage
    pub out_channels: usize,
    /// Number of blocks
    pub repeats: usize,
}

/// Configuration of the backbone
#[derive(Config, Debug, PartialEq)]
pub struct EfficientNetConfig {
    /// Channels produced by the stem convolution
    #[config(default = "32")]
    pub stem_channels: usize,

    /// MBConv stages in order
    pub stages: Vec<StageConfig>,

    /// Channels of the final 1x1 convolution (the feature size)
    #[config(default = "1280")]
    pub head_channels: usize,
}

impl EfficientNetConfig {
    /// EfficientNet-Lite0 layout
    pub fn lite0() -> Self {
        Self::new(vec![
            StageConfig::new(1, 3, 1, 16, 1),
            StageConfig::new(6, 3, 2, 24, 2),
            StageConfig::new(6, 5, 2, 40, 2),
            StageConfig::new(6, 3, 2, 80, 3),
            StageConfig::new(6, 5, 1, 112, 3),
            StageConfig::new(6, 5, 2, 192, 4),
            StageConfig::new(6, 3, 1, 320, 1),
        ])
    }

    /// A very small layout for quick experiments on CPU
    pub fn tiny() -> Self {
        Self::new(vec![
            StageConfig::new(1, 3, 1, 8, 1),
            StageConfig::new(4, 3, 2, 16, 2),
        ])
        .with_stem_channels(8)
        .with_head_channels(32)
    }

    /// Build the backbone
    pub fn init<B: Backend>(&self, device: &B::Device) -> EfficientNet<B> {
        let stem = conv_bn(3, self.stem_channels, 3, 2, 1, device);

        let mut blocks = Vec::new();
        let mut in_channels = self.stem_channels;
        for stage in &self.stages {
            for repeat in 0..stage.repeats {
                let stride = if repeat == 0 { stage.stride } else { 1 };
                blocks.push(MbConvBlock::new(
                    in_channels,
                    stage.out_channels,
                    stage.expand_ratio,
                    stage.kernel_size,
                    stride,
                    device,
                ));
                in_channels = stage.out_channels;
            }
        }

        let head = conv_bn(in_channels, self.head_channels, 1, 1, 1, device);

        EfficientNet {
            stem,
            blocks,
            head,
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            feature_size: self.head_channels,
        }
    }

    /// Number of MBConv blocks across all stages
    pub fn num_blocks(&self) -> usize {
        self.stages.iter().map(|s| s.repeats).sum()
    }
}

/// ReLU clipped at 6
pub fn relu6<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    x.clamp(0.0, 6.0)
}

/// Convolution followed by batch normalization
#[derive(Module, Debug)]
pub struct ConvBn<B: Backend> {
    pub conv: Conv2d<B>,
    pub bn: BatchNorm<B>,
}

fn conv_bn<B: Backend>(
    in_channels: usize,
    out_channels: usize,
    kernel_size: usize,
    stride: usize,
    groups: usize,
    device: &B::Device,
) -> ConvBn<B> {
    let padding = kernel_size / 2;
    let conv = Conv2dConfig::new([in_channels, out_channels], [kernel_size, kernel_size])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(padding, padding))
        .with_groups(groups)
        .with_bias(false)
        .init(device);

    ConvBn {
        conv,
        bn: BatchNormConfig::new(out_channels).init(device),
    }
}

impl<B: Backend> ConvBn<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.bn.forward(self.conv.forward(x))
    }
}

/// Inverted residual block: expand 1x1, depthwise kxk, project 1x1
#[derive(Module, Debug)]
pub struct MbConvBlock<B: Backend> {
    /// Absent when the expansion ratio is 1
    pub expand: Option<ConvBn<B>>,
    pub depthwise: ConvBn<B>,
    pub project: ConvBn<B>,
}

impl<B: Backend> MbConvBlock<B> {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        expand_ratio: usize,
        kernel_size: usize,
        stride: usize,
        device: &B::Device,
    ) -> Self {
        let hidden = in_channels * expand_ratio.max(1);
        let expand = if expand_ratio > 1 {
            Some(conv_bn(in_channels, hidden, 1, 1, 1, device))
        } else {
            None
        };

        Self {
            expand,
            depthwise: conv_bn(hidden, hidden, kernel_size, stride, hidden, device),
            project: conv_bn(hidden, out_channels, 1, 1, 1, device),
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = match &self.expand {
            Some(expand) => relu6(expand.forward(input.clone())),
            None => input.clone(),
        };
        let x = relu6(self.depthwise.forward(x));
        let x = self.project.forward(x);

        // Identity shortcut when stride is 1 and channels match
        if x.dims() == input.dims() {
            x + input
        } else {
            x
        }
    }
}

/// EfficientNet-Lite feature extractor producing `[batch, feature_size]`
#[derive(Module, Debug)]
pub struct EfficientNet<B: Backend> {
    pub stem: ConvBn<B>,
    pub blocks: Vec<MbConvBlock<B>>,
    pub head: ConvBn<B>,
    pub pool: AdaptiveAvgPool2d,
    feature_size: usize,
}

impl<B: Backend> EfficientNet<B> {
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = relu6(self.stem.forward(images));
        for block in &self.blocks {
            x = block.forward(x);
        }
        let x = relu6(self.head.forward(x));

        let x = self.pool.forward(x);
        let [batch, channels, _, _] = x.dims();
        x.reshape([batch, channels])
    }

    /// Width of the feature vector
    pub fn feature_size(&self) -> usize {
        self.feature_size
    }
}
