// ============================================================
// Layer 5 — NMT Model (Seq2SeqModel implementation)
// ============================================================
// Wraps the burn network, its Adam optimiser and the loss into
// the Seq2SeqModel contract used by the training loop and the
// beam-search engine.
//
//   train_step   TrainBackend (autodiff): forward with dropout,
//                cross-entropy ignoring <pad>, backward, Adam
//   evaluate     model.valid() on ComputeBackend, token-weighted
//                mean loss and perplexity
//   encode       model.valid(), encoder output kept in NmtEncoded
//   decode_step  log-softmax over the next token per hypothesis
//   state        BinBytesRecorder records of weights + optimiser
//
// Adam:
//   m = β1*m + (1-β1)*g        (mean)
//   v = β2*v + (1-β2)*g²       (variance)
//   θ = θ - lr * m / (√v + ε)  (update)
// with gradient-norm clipping at `gclip` (0 disables).
//
// Reference: Kingma & Ba (2015) Adam
//            Burn Book §5 (Training), §6 (Records)

use anyhow::Result;
use burn::{
    grad_clipping::GradientClippingConfig,
    module::AutodiffModule,
    nn::loss::CrossEntropyLossConfig,
    optim::{adaptor::OptimizerAdaptor, Adam, AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::activation::log_softmax,
};

use crate::application::settings::{ModelSettings, Settings};
use crate::data::batcher::Seq2SeqBatcher;
use crate::domain::history::Metrics;
use crate::domain::model_kind::ModelKind;
use crate::domain::random::RandomStream;
use crate::domain::sequence::{Batch, ParallelCorpus, TokenId, PAD_ID};
use crate::domain::traits::{LogProbs, ModelState, Seq2SeqModel, StepOutput, StepQuery};
use crate::ml::backend::{ComputeBackend, ComputeDevice, TrainBackend};
use crate::ml::model::{ContextMode, Memory, NetDims, Seq2SeqNet};

type NetOptimizer = OptimizerAdaptor<Adam, Seq2SeqNet<TrainBackend>, TrainBackend>;
type OptimRecord = <NetOptimizer as Optimizer<Seq2SeqNet<TrainBackend>, TrainBackend>>::Record;
type NetRecord = <Seq2SeqNet<TrainBackend> as Module<TrainBackend>>::Record;

fn recorder() -> BinBytesRecorder<FullPrecisionSettings> {
    BinBytesRecorder::<FullPrecisionSettings>::default()
}

fn context_mode(kind: ModelKind) -> ContextMode {
    match kind {
        ModelKind::Attention => ContextMode::Attention,
        ModelKind::MeanPool  => ContextMode::MeanPool,
    }
}

/// Encoder output for one decoding batch, plus the eval-mode network.
pub struct NmtEncoded {
    net:    Seq2SeqNet<ComputeBackend>,
    memory: Memory<ComputeBackend>,
}

pub struct NmtModel {
    kind:      ModelKind,
    mode:      ContextMode,
    net:       Seq2SeqNet<TrainBackend>,
    optim:     NetOptimizer,
    lr:        f64,
    dropout:   f64,
    trg_vocab: usize,
    device:    ComputeDevice,
}

impl NmtModel {
    /// The model-kind registry: every ModelKind maps to a network
    /// configuration here. Parameters are drawn from `rng`.
    pub fn build(
        settings:  &ModelSettings,
        src_vocab: usize,
        trg_vocab: usize,
        lr:        f64,
        gclip:     f64,
        device:    &ComputeDevice,
        rng:       &mut RandomStream,
    ) -> Self {
        let dims = NetDims {
            src_vocab,
            trg_vocab,
            emb_dim:    settings.emb_dim,
            hid_dim:    settings.hid_dim,
            init_scale: settings.init_scale as f32,
        };
        let net: Seq2SeqNet<TrainBackend> = dims.init(rng, device);

        let clipping = (gclip > 0.0).then(|| GradientClippingConfig::Norm(gclip as f32));
        let optim = AdamConfig::new()
            .with_epsilon(1e-8)
            .with_grad_clipping(clipping)
            .init();

        tracing::info!(
            "Model ready: {} (emb_dim={}, hid_dim={}, src_vocab={src_vocab}, trg_vocab={trg_vocab})",
            settings.kind,
            settings.emb_dim,
            settings.hid_dim
        );

        Self {
            kind: settings.kind,
            mode: context_mode(settings.kind),
            net,
            optim,
            lr,
            dropout: settings.dropout,
            trg_vocab,
            device: device.clone(),
        }
    }

    /// Rebuild the configured architecture and adopt a saved state.
    pub fn restore(
        settings:  &Settings,
        src_vocab: usize,
        trg_vocab: usize,
        state:     &ModelState,
        device:    &ComputeDevice,
    ) -> Result<Self> {
        // initial weights are overwritten by `state`
        let mut rng = RandomStream::from_seed(settings.train.seed);
        let mut model = Self::build(
            &settings.model,
            src_vocab,
            trg_vocab,
            settings.train.lr,
            settings.train.gclip,
            device,
            &mut rng,
        );
        model.load_state(state)?;
        Ok(model)
    }

    fn batch_loss<B: Backend>(
        net:     &Seq2SeqNet<B>,
        batch:   &Batch,
        mode:    ContextMode,
        device:  &B::Device,
        dropout: Option<(f64, &mut RandomStream)>,
    ) -> Result<Tensor<B, 1>> {
        let tensors = Seq2SeqBatcher::<B>::new(device.clone()).batch(batch)?;
        let logits = match dropout {
            Some((p, rng)) if p > 0.0 => {
                let memory = net.encode(tensors.source, Some((p, &mut *rng)));
                net.forward(&memory, tensors.dec_in, mode, Some((p, rng)))
            }
            _ => {
                let memory = net.encode(tensors.source, None);
                net.forward(&memory, tensors.dec_in, mode, None)
            }
        };
        Ok(Self::cross_entropy(logits, tensors.dec_out, device))
    }

    fn cross_entropy<B: Backend>(
        logits:  Tensor<B, 3>,
        targets: Tensor<B, 2, Int>,
        device:  &B::Device,
    ) -> Tensor<B, 1> {
        let [n, t, v] = logits.dims();
        let ce = CrossEntropyLossConfig::new()
            .with_pad_tokens(Some(vec![PAD_ID as usize]))
            .init(device);
        ce.forward(logits.reshape([n * t, v]), targets.reshape([n * t]))
    }
}

impl Seq2SeqModel for NmtModel {
    type Encoded = NmtEncoded;

    fn kind(&self) -> ModelKind {
        self.kind
    }

    fn target_vocab(&self) -> usize {
        self.trg_vocab
    }

    fn train_step(&mut self, batch: &Batch, rng: &mut RandomStream) -> Result<StepOutput> {
        let loss = Self::batch_loss(&self.net, batch, self.mode, &self.device, Some((self.dropout, rng)))?;
        let loss_val: f64 = loss.clone().into_scalar().elem::<f64>();
        if !loss_val.is_finite() {
            anyhow::bail!("non-finite loss {loss_val}");
        }

        // Backward pass + Adam update
        let grads = loss.backward();
        let grads = GradientsParams::from_grads(grads, &self.net);
        self.net = self.optim.step(self.lr, self.net.clone(), grads);

        Ok(StepOutput { loss: loss_val, tokens: batch.target_tokens() })
    }

    fn evaluate(&self, split: &ParallelCorpus, batch_size: usize) -> Result<Metrics> {
        anyhow::ensure!(split.has_targets(), "split '{}' has no targets to evaluate on", split.name);
        let net = self.net.valid();

        let mut loss_sum = 0.0f64;
        let mut tokens   = 0usize;
        for batch in split.chunks(batch_size) {
            let loss = Self::batch_loss(&net, &batch, self.mode, &self.device, None)?;
            let n = batch.target_tokens();
            loss_sum += loss.into_scalar().elem::<f64>() * n as f64;
            tokens   += n;
        }
        anyhow::ensure!(tokens > 0, "split '{}' has no target tokens", split.name);

        let loss = loss_sum / tokens as f64;
        anyhow::ensure!(loss.is_finite(), "evaluation loss is {loss}");
        let mut metrics = Metrics::new();
        metrics.insert("loss".into(), loss);
        metrics.insert("ppl".into(), loss.exp());
        Ok(metrics)
    }

    fn encode(&self, sources: &[Vec<TokenId>]) -> Result<NmtEncoded> {
        anyhow::ensure!(!sources.is_empty(), "cannot encode an empty batch");
        let net = self.net.valid();
        let source = Seq2SeqBatcher::<ComputeBackend>::new(self.device.clone()).sources(sources);
        let memory = net.encode(source, None);
        Ok(NmtEncoded { net, memory })
    }

    fn decode_step(&self, encoded: &NmtEncoded, queries: &[StepQuery<'_>]) -> Result<LogProbs> {
        if queries.is_empty() {
            return LogProbs::new(self.trg_vocab, Vec::new());
        }
        let rows: Vec<usize> = queries.iter().map(|q| q.source).collect();
        let histories: Vec<&[TokenId]> = queries.iter().map(|q| q.history).collect();

        let memory = encoded.memory.select(&rows, &self.device);
        let logits = encoded.net.step(&memory, &histories, self.mode);
        let data = log_softmax(logits, 1)
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| anyhow::anyhow!("Cannot read log-probabilities: {e:?}"))?;
        LogProbs::new(self.trg_vocab, data)
    }

    fn state(&self) -> Result<ModelState> {
        let params = recorder()
            .record(self.net.clone().into_record(), ())
            .map_err(|e| anyhow::anyhow!("Failed to serialise model weights: {e:?}"))?;
        let optimizer = recorder()
            .record(self.optim.to_record(), ())
            .map_err(|e| anyhow::anyhow!("Failed to serialise optimizer state: {e:?}"))?;
        Ok(ModelState { kind: self.kind, params, optimizer: Some(optimizer) })
    }

    fn load_state(&mut self, state: &ModelState) -> Result<()> {
        anyhow::ensure!(
            state.kind == self.kind,
            "state holds a '{}' model, expected '{}'",
            state.kind,
            self.kind
        );
        let record: NetRecord = recorder()
            .load(state.params.clone(), &self.device)
            .map_err(|e| anyhow::anyhow!("Model weights do not match the configured architecture: {e:?}"))?;
        let net = self.net.clone().load_record(record);

        let optim = match &state.optimizer {
            Some(bytes) => {
                let record: OptimRecord = recorder()
                    .load(bytes.clone(), &self.device)
                    .map_err(|e| anyhow::anyhow!("Optimizer state does not match the model: {e:?}"))?;
                Some(record)
            }
            None => None,
        };

        // adopt both or neither
        self.net = net;
        if let Some(record) = optim {
            let fresh = std::mem::replace(&mut self.optim, AdamConfig::new().init());
            self.optim = fresh.load_record(record);
        }
        Ok(())
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::sequence::SequencePair;

    fn settings(kind: ModelKind) -> ModelSettings {
        ModelSettings { kind, emb_dim: 8, hid_dim: 8, dropout: 0.0, init_scale: 0.1 }
    }

    fn model(kind: ModelKind, seed: u64) -> NmtModel {
        NmtModel::build(&settings(kind), 10, 10, 0.01, 1.0, &Default::default(), &mut RandomStream::from_seed(seed))
    }

    fn corpus() -> ParallelCorpus {
        let pair = |s: &[u32], t: &[u32]| SequencePair { src: s.to_vec(), trg: Some(t.to_vec()) };
        ParallelCorpus::new("toy", vec![pair(&[4, 5], &[6, 7]), pair(&[5, 4], &[7, 6]), pair(&[8], &[9])])
    }

    #[test]
    fn test_training_reduces_loss() {
        let mut m = model(ModelKind::Attention, 1);
        let data = corpus();
        let before = m.evaluate(&data, 2).unwrap()["loss"];
        let mut rng = RandomStream::from_seed(2);
        for _ in 0..30 {
            let batch = data.batch(&[0, 1, 2]);
            let out = m.train_step(&batch, &mut rng).unwrap();
            assert!(out.loss.is_finite());
            assert_eq!(out.tokens, 8);
        }
        let after = m.evaluate(&data, 2).unwrap()["loss"];
        assert!(after < before, "{after} !< {before}");
    }

    #[test]
    fn test_decode_step_rows_are_log_distributions() {
        let m = model(ModelKind::MeanPool, 3);
        let enc = m.encode(&[vec![4, 5], vec![8]]).unwrap();
        let queries = [
            StepQuery { source: 1, history: &[] },
            StepQuery { source: 0, history: &[6, 7] },
        ];
        let lp = m.decode_step(&enc, &queries).unwrap();
        assert_eq!(lp.rows(), 2);
        for r in 0..2 {
            let total: f32 = lp.row(r).iter().map(|x| x.exp()).sum();
            assert!((total - 1.0).abs() < 1e-4);
        }
        assert_eq!(m.decode_step(&enc, &[]).unwrap().rows(), 0);
    }

    #[test]
    fn test_state_round_trip_restores_outputs_and_optimizer() {
        let data = corpus();
        let mut a = model(ModelKind::Attention, 5);
        let mut rng = RandomStream::from_seed(9);
        a.train_step(&data.batch(&[0, 1]), &mut rng).unwrap();
        let state = a.state().unwrap();

        // a differently initialised model adopts the saved state
        let mut b = model(ModelKind::Attention, 77);
        b.load_state(&state).unwrap();

        let mut rng_a = RandomStream::from_seed(10);
        let mut rng_b = RandomStream::from_seed(10);
        let la = a.train_step(&data.batch(&[2, 0]), &mut rng_a).unwrap().loss;
        let lb = b.train_step(&data.batch(&[2, 0]), &mut rng_b).unwrap().loss;
        assert!((la - lb).abs() < 1e-6);
        let ea = a.evaluate(&data, 3).unwrap()["loss"];
        let eb = b.evaluate(&data, 3).unwrap()["loss"];
        assert!((ea - eb).abs() < 1e-6, "{ea} vs {eb}");
    }

    #[test]
    fn test_restore_from_checkpoint_file_evaluates_identically() {
        use crate::application::settings::tests::config_with_data;
        use crate::domain::history::{History, TrainProgress};
        use crate::infra::checkpoint::{load_bundle, save_bundle, CheckpointBundle};

        let mut config = config_with_data();
        config.set("model", "emb_dim", 8i64.into());
        config.set("model", "hid_dim", 8i64.into());
        config.set("model", "dropout", 0.1f64.into());
        let settings = Settings::from_config(&config).unwrap();

        let data = corpus();
        let device = Default::default();
        let mut rng = RandomStream::from_seed(settings.train.seed);
        let mut trained = NmtModel::build(
            &settings.model,
            10,
            10,
            settings.train.lr,
            settings.train.gclip,
            &device,
            &mut rng,
        );
        for order in [[0, 1], [2, 0], [1, 2]] {
            trained.train_step(&data.batch(&order), &mut rng).unwrap();
        }
        let before = trained.evaluate(&data, 2).unwrap();

        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("run.best.loss.ckpt");
        let bundle = CheckpointBundle {
            model:    trained.state().unwrap(),
            history:  History::new(),
            progress: TrainProgress::start("attention-rtest", rng.state()),
            config,
        };
        save_bundle(&path, &bundle).unwrap();

        let loaded = load_bundle(&path, Some(ModelKind::Attention)).unwrap();
        let settings = Settings::from_config(&loaded.config).unwrap();
        let restored = NmtModel::restore(&settings, 10, 10, &loaded.model, &device).unwrap();
        let after = restored.evaluate(&data, 2).unwrap();

        assert_eq!(before.keys().collect::<Vec<_>>(), after.keys().collect::<Vec<_>>());
        for (name, value) in &before {
            assert!((value - after[name]).abs() < 1e-9, "{name}: {value} vs {}", after[name]);
        }
    }

    #[test]
    fn test_state_of_other_kind_is_rejected() {
        let a = model(ModelKind::Attention, 1);
        let mut b = model(ModelKind::MeanPool, 1);
        assert!(b.load_state(&a.state().unwrap()).is_err());
    }
}
