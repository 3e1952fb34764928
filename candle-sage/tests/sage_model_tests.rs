use candle_core::{DType, Device, Result, Tensor};
use candle_nn::{VarBuilder, VarMap};
use candle_sage::data_loader::InMemoryData;
use candle_sage::model_traits::*;
use candle_sage::sage::*;
use candle_sage::vae::*;
use candle_sage::vae_train::{TrainConfig, Vae};

fn small_config() -> SageConfig {
    SageConfig {
        dim_input: 8,
        layer_dims: vec![16, 16],
        num_samples: vec![3, 2],
        use_bias: true,
    }
}

fn random_hops(config: &SageConfig, batch: usize, dev: &Device) -> Result<Vec<Tensor>> {
    config
        .hop_sizes()
        .iter()
        .map(|&m| Tensor::randn(0f32, 1f32, (batch, m, config.dim_input), dev))
        .collect()
}

#[test]
fn sage_forward_shape_and_norm() -> Result<()> {
    let dev = Device::Cpu;
    let config = small_config();

    let varmap = VarMap::new();
    let vs = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
    let encoder = GraphSageEncoder::new(config.clone(), vs)?;

    let hops = random_hops(&config, 5, &dev)?;
    let z = encoder.forward(&hops)?;
    assert_eq!(z.dims(), &[5, 16]);

    // rows are L2-normalized
    let norms: Vec<f32> = z.sqr()?.sum(1)?.sqrt()?.to_vec1()?;
    for n in norms {
        assert!((n - 1.0).abs() < 1e-3, "row norm {} != 1", n);
    }
    Ok(())
}

#[test]
fn sage_rejects_wrong_pyramid() -> Result<()> {
    let dev = Device::Cpu;
    let config = small_config();

    let varmap = VarMap::new();
    let vs = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
    let encoder = GraphSageEncoder::new(config.clone(), vs)?;

    let mut hops = random_hops(&config, 2, &dev)?;
    hops.pop();
    assert!(encoder.forward(&hops).is_err());
    Ok(())
}

#[test]
fn sage_weights_roundtrip_through_safetensors() -> anyhow::Result<()> {
    let dev = Device::Cpu;
    let config = small_config();

    let varmap = VarMap::new();
    let vs = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
    let encoder = GraphSageEncoder::new(config.clone(), vs)?;

    let hops = random_hops(&config, 3, &dev)?;
    let z_before: Vec<f32> = encoder.forward(&hops)?.flatten_all()?.to_vec1()?;

    let dir = tempfile::tempdir()?;
    let model_file = dir.path().join("model.safetensors");
    varmap.save(&model_file)?;

    let mut varmap2 = VarMap::new();
    let vs2 = VarBuilder::from_varmap(&varmap2, DType::F32, &dev);
    let encoder2 = GraphSageEncoder::new(config, vs2)?;
    varmap2.load(&model_file)?;

    let z_after: Vec<f32> = encoder2.forward(&hops)?.flatten_all()?.to_vec1()?;
    assert_eq!(z_before.len(), z_after.len());
    for (a, b) in z_before.iter().zip(z_after.iter()) {
        assert!((a - b).abs() < 1e-5);
    }
    Ok(())
}

#[test]
fn sage_config_json_roundtrip() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let file = dir.path().join("model.json");
    let file = file.to_str().unwrap();

    let config = small_config();
    config.to_json_file(file)?;
    let back = SageConfig::from_json_file(file)?;
    assert_eq!(config, back);
    assert_eq!(back.hop_sizes(), vec![1, 3, 6]);
    Ok(())
}

#[test]
fn link_head_score_shape() -> Result<()> {
    let dev = Device::Cpu;
    let src = Tensor::randn(0f32, 1f32, (7, 16), &dev)?;
    let dst = Tensor::randn(0f32, 1f32, (7, 16), &dev)?;
    let scores = LinkPredictionHead::score(&src, &dst)?;
    assert_eq!(scores.dims(), &[7]);
    Ok(())
}

#[test]
fn vae_modules_agree_on_shapes() -> Result<()> {
    let dev = Device::Cpu;
    let (n, d, b, k) = (6, 12, 2, 4);

    let varmap = VarMap::new();
    let vs = VarBuilder::from_varmap(&varmap, DType::F32, &dev);

    let encoder = GaussianEncoder::new(
        GaussianEncoderArgs {
            n_features: d,
            n_covariates: b,
            n_latent: k,
            layers: &[16, 8],
        },
        vs.clone(),
    )?;
    let decoder = NbDecoder::new(
        NbDecoderArgs {
            n_genes: d,
            n_covariates: b,
            n_latent: k,
            layers: &[8],
        },
        vs,
    )?;

    let x = Tensor::rand(0f32, 5f32, (n, d), &dev)?.floor()?;
    let covar = Tensor::zeros((n, b), DType::F32, &dev)?;

    let (z, kl) = encoder.forward_t(&x, Some(&covar), false)?;
    assert_eq!(z.dims(), &[n, k]);
    assert_eq!(kl.dims(), &[n]);

    let (recon, llik) = decoder.forward_with_llik(&z, Some(&covar), &x)?;
    assert_eq!(recon.dims(), &[n, d]);
    assert_eq!(llik.dims(), &[n]);

    let llik_vals: Vec<f32> = llik.to_vec1()?;
    for v in llik_vals {
        assert!(v.is_finite());
    }
    Ok(())
}

#[test]
fn vae_training_reduces_nothing_to_nan() -> anyhow::Result<()> {
    use nalgebra::DMatrix;

    let dev = Device::Cpu;
    let (n, d, k) = (24, 10, 3);

    let varmap = VarMap::new();
    let vs = VarBuilder::from_varmap(&varmap, DType::F32, &dev);

    let encoder = GaussianEncoder::new(
        GaussianEncoderArgs {
            n_features: d,
            n_covariates: 2,
            n_latent: k,
            layers: &[16],
        },
        vs.clone(),
    )?;
    let decoder = NbDecoder::new(
        NbDecoderArgs {
            n_genes: d,
            n_covariates: 2,
            n_latent: k,
            layers: &[],
        },
        vs,
    )?;

    let counts = DMatrix::<f32>::from_fn(n, d, |i, j| ((i * 7 + j * 3) % 5) as f32);
    let covar = DMatrix::<f32>::from_fn(n, 2, |i, j| if i % 2 == j { 1.0 } else { 0.0 });

    let mut data = InMemoryData::new_with_covariate(&counts, &covar)?;
    let mut vae = Vae::build(&encoder, &decoder, &varmap);

    let trace = vae.train_encoder_decoder(
        &mut data,
        &TrainConfig {
            learning_rate: 1e-3,
            batch_size: 8,
            num_epochs: 3,
            kl_warmup_epochs: 0.0,
            device: dev,
            seed: 42,
            verbose: false,
            show_progress: false,
        },
    )?;

    assert_eq!(trace.llik.len(), 3);
    for v in trace.llik.iter().chain(trace.kl.iter()) {
        assert!(v.is_finite());
    }
    Ok(())
}
