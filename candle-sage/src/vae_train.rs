use crate::data_loader::*;
use crate::model_traits::{DecoderModuleT, EncoderModuleT};

use candle_core::Device;
use candle_nn::{AdamW, Optimizer};
use indicatif::{ProgressBar, ProgressDrawTarget};
use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;

pub struct TrainConfig {
    pub learning_rate: f32,
    pub batch_size: usize,
    pub num_epochs: usize,
    /// KL weight warm-up: `1 - exp(-epoch / warmup)`; 0 disables
    pub kl_warmup_epochs: f64,
    pub device: Device,
    pub seed: u64,
    pub verbose: bool,
    pub show_progress: bool,
}

pub struct TrainTrace {
    pub llik: Vec<f32>,
    pub kl: Vec<f32>,
}

pub struct Vae<'a, Enc, Dec>
where
    Enc: EncoderModuleT,
    Dec: DecoderModuleT,
{
    pub encoder: &'a Enc,
    pub decoder: &'a Dec,
    pub variable_map: &'a candle_nn::VarMap,
}

impl<'a, Enc, Dec> Vae<'a, Enc, Dec>
where
    Enc: EncoderModuleT,
    Dec: DecoderModuleT,
{
    pub fn build(encoder: &'a Enc, decoder: &'a Dec, variable_map: &'a candle_nn::VarMap) -> Self {
        assert_eq!(encoder.dim_latent(), decoder.dim_latent());
        Self {
            encoder,
            decoder,
            variable_map,
        }
    }

    /// Train encoder and decoder jointly on `data`; the decoder
    /// reconstructs the loader's output rows when present, the input
    /// rows otherwise. Returns per-epoch mean llik/KL traces.
    pub fn train_encoder_decoder(
        &mut self,
        data: &mut InMemoryData,
        train_config: &TrainConfig,
    ) -> anyhow::Result<TrainTrace> {
        let device = &train_config.device;
        let mut adam = AdamW::new_lr(
            self.variable_map.all_vars(),
            train_config.learning_rate.into(),
        )?;

        let pb = ProgressBar::new(train_config.num_epochs as u64);
        if !train_config.show_progress || train_config.verbose {
            pb.set_draw_target(ProgressDrawTarget::hidden());
        }

        let mut rng = StdRng::seed_from_u64(train_config.seed);
        data.shuffle_minibatch(train_config.batch_size, &mut rng)?;

        let minibatches = (0..data.num_minibatch())
            .map(|b| data.minibatch_shuffled(b, device))
            .collect::<anyhow::Result<Vec<_>>>()?;

        let mut llik_trace = Vec::with_capacity(train_config.num_epochs);
        let mut kl_trace = Vec::with_capacity(train_config.num_epochs);

        for epoch in 0..train_config.num_epochs {
            let kl_weight = if train_config.kl_warmup_epochs > 0.0 {
                1.0 - (-(epoch as f64) / train_config.kl_warmup_epochs).exp()
            } else {
                1.0
            };

            let mut llik_tot = 0f32;
            let mut kl_tot = 0f32;

            for mb in minibatches.iter() {
                let (z_nk, kl_n) =
                    self.encoder
                        .forward_t(&mb.input, mb.covariate.as_ref(), true)?;

                let target = mb.output.as_ref().unwrap_or(&mb.input);
                let (_, llik_n) =
                    self.decoder
                        .forward_with_llik(&z_nk, mb.covariate.as_ref(), target)?;

                let loss = ((&kl_n * kl_weight)? - &llik_n)?.mean_all()?;
                adam.backward_step(&loss)?;

                llik_tot += llik_n.sum_all()?.to_scalar::<f32>()?;
                kl_tot += kl_n.sum_all()?.to_scalar::<f32>()?;
            }

            let nb = data.num_minibatch().max(1) as f32;
            llik_trace.push(llik_tot / nb);
            kl_trace.push(kl_tot / nb);
            pb.inc(1);

            if train_config.verbose {
                info!(
                    "[{}] log-likelihood: {} kl: {}",
                    epoch + 1,
                    llik_trace.last().ok_or(anyhow::anyhow!("llik"))?,
                    kl_trace.last().ok_or(anyhow::anyhow!("kl"))?
                );
            }
        }
        pb.finish_and_clear();

        Ok(TrainTrace {
            llik: llik_trace,
            kl: kl_trace,
        })
    }
}
