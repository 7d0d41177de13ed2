//! Adam optimizer and step-decay schedule
//!
//! A direct nalgebra implementation of Adam with decoupled weight decay,
//! holding first/second moment buffers shaped like the model it optimizes,
//! plus the step-decay learning-rate schedule the trainer drives per epoch.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use nalgebra::{DMatrix, DVector};

use crate::model::{EmbeddingModel, LayerGradient, Mlp, ModelGradients};

/// Step-decay learning-rate schedule: `lr * gamma^(epoch / step_size)`.
#[derive(Debug, Clone, Copy)]
pub struct StepDecaySchedule {
    pub initial_lr: f64,
    pub step_size: usize,
    pub gamma: f64,
}

impl StepDecaySchedule {
    pub fn learning_rate(&self, epoch: usize) -> f64 {
        self.initial_lr * self.gamma.powi((epoch / self.step_size.max(1)) as i32)
    }
}

#[derive(Debug, Clone)]
struct MomentPair {
    m_weight: DMatrix<f64>,
    v_weight: DMatrix<f64>,
    m_bias: DVector<f64>,
    v_bias: DVector<f64>,
}

impl MomentPair {
    fn zeros_like(layer_gradient: &LayerGradient) -> Self {
        Self {
            m_weight: DMatrix::zeros(layer_gradient.weight.nrows(), layer_gradient.weight.ncols()),
            v_weight: DMatrix::zeros(layer_gradient.weight.nrows(), layer_gradient.weight.ncols()),
            m_bias: DVector::zeros(layer_gradient.bias.nrows()),
            v_bias: DVector::zeros(layer_gradient.bias.nrows()),
        }
    }
}

/// Adam with decoupled weight decay over an encoder/decoder pair.
#[derive(Debug)]
pub struct Adam {
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    weight_decay: f64,
    step_count: u32,
    encoder_moments: Vec<MomentPair>,
    decoder_moments: Vec<MomentPair>,
}

impl Adam {
    pub fn new(weight_decay: f64) -> Self {
        Self {
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            weight_decay,
            step_count: 0,
            encoder_moments: Vec::new(),
            decoder_moments: Vec::new(),
        }
    }

    /// Apply one update with the given learning rate.
    pub fn step(&mut self, model: &mut EmbeddingModel, gradients: &ModelGradients, lr: f64) {
        if self.encoder_moments.is_empty() {
            self.encoder_moments = gradients.encoder.iter().map(MomentPair::zeros_like).collect();
            self.decoder_moments = gradients.decoder.iter().map(MomentPair::zeros_like).collect();
        }
        self.step_count += 1;
        let bias1 = 1.0 - self.beta1.powi(self.step_count as i32);
        let bias2 = 1.0 - self.beta2.powi(self.step_count as i32);

        update_mlp(
            &mut model.encoder,
            &gradients.encoder,
            &mut self.encoder_moments,
            self.beta1,
            self.beta2,
            self.epsilon,
            self.weight_decay,
            lr,
            bias1,
            bias2,
        );
        update_mlp(
            &mut model.decoder,
            &gradients.decoder,
            &mut self.decoder_moments,
            self.beta1,
            self.beta2,
            self.epsilon,
            self.weight_decay,
            lr,
            bias1,
            bias2,
        );
    }
}

#[allow(clippy::too_many_arguments)]
fn update_mlp(
    mlp: &mut Mlp,
    gradients: &[LayerGradient],
    moments: &mut [MomentPair],
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    weight_decay: f64,
    lr: f64,
    bias1: f64,
    bias2: f64,
) {
    for ((layer, gradient), moment) in mlp.layers.iter_mut().zip(gradients).zip(moments) {
        for r in 0..layer.weight.nrows() {
            for c in 0..layer.weight.ncols() {
                let g = gradient.weight[(r, c)] + weight_decay * layer.weight[(r, c)];
                let m = &mut moment.m_weight[(r, c)];
                *m = beta1 * *m + (1.0 - beta1) * g;
                let v = &mut moment.v_weight[(r, c)];
                *v = beta2 * *v + (1.0 - beta2) * g * g;
                let m_hat = moment.m_weight[(r, c)] / bias1;
                let v_hat = moment.v_weight[(r, c)] / bias2;
                layer.weight[(r, c)] -= lr * m_hat / (v_hat.sqrt() + epsilon);
            }
        }
        for r in 0..layer.bias.nrows() {
            let g = gradient.bias[r];
            let m = &mut moment.m_bias[r];
            *m = beta1 * *m + (1.0 - beta1) * g;
            let v = &mut moment.v_bias[r];
            *v = beta2 * *v + (1.0 - beta2) * g * g;
            let m_hat = moment.m_bias[r] / bias1;
            let v_hat = moment.v_bias[r] / bias2;
            layer.bias[r] -= lr * m_hat / (v_hat.sqrt() + epsilon);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn schedule_decays_in_steps() {
        let schedule = StepDecaySchedule { initial_lr: 0.01, step_size: 4, gamma: 0.1 };
        assert!((schedule.learning_rate(0) - 0.01).abs() < 1e-12);
        assert!((schedule.learning_rate(3) - 0.01).abs() < 1e-12);
        assert!((schedule.learning_rate(4) - 0.001).abs() < 1e-12);
        assert!((schedule.learning_rate(8) - 0.0001).abs() < 1e-12);
    }

    #[test]
    fn adam_descends_a_quadratic() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let mut model = EmbeddingModel::new(&[2, 2], &[2, 2], &mut rng).unwrap();
        let mut adam = Adam::new(0.0);

        // minimize 0.5 * ||W||^2 on the encoder weights
        let initial_norm = model.encoder.layers[0].weight.norm();
        for _ in 0..200 {
            let mut gradients = ModelGradients::zeros(&model);
            gradients.encoder[0].weight = model.encoder.layers[0].weight.clone();
            adam.step(&mut model, &gradients, 0.01);
        }
        assert!(model.encoder.layers[0].weight.norm() < initial_norm * 0.5);
    }
}
