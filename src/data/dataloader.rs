// ============================================================
// Layer 4 — Prompt Data Loader
// ============================================================
// Wraps, tokenises and batches a list of examples:
//
//   InputExample ─template─▶ WrappedExample ─tokenizer─▶ TokenizedExample
//                                                           │
//                          PromptBatcher (stack on device) ◀┘
//
// Tokenisation happens once, up front. `iter()` then hands out
// batches lazily and can be called again for every epoch; with
// shuffling on, each call sees a fresh order.
//
// All sequences are already padded to max_seq_length, so the
// batcher only has to flatten and reshape:
//   [s1_t1, ..., s1_tS, s2_t1, ..., sN_tS] → [N, S]

use anyhow::Result;
use burn::prelude::*;
use rand::seq::SliceRandom;

use crate::data::template::PromptTemplate;
use crate::data::tokenize::{PromptTokenizer, TokenizedExample};
use crate::domain::example::InputExample;

// ─── PromptBatch ─────────────────────────────────────────────────────────────
/// A batch ready for the model. Tensors are `[batch_size, max_seq_length]`.
#[derive(Debug, Clone)]
pub struct PromptBatch<B: Backend> {
    pub input_ids:      Tensor<B, 2, Int>,
    pub attention_mask: Tensor<B, 2, Int>,
    pub loss_ids:       Tensor<B, 2, Int>,
    /// Unpadded prompt ids per instance, used by generation
    pub prompts:        Vec<Vec<u32>>,
    pub guids:          Vec<String>,
    /// References kept for evaluation
    pub tgt_texts:      Vec<String>,
}

impl<B: Backend> PromptBatch<B> {
    pub fn len(&self) -> usize {
        self.guids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guids.is_empty()
    }
}

// ─── PromptBatcher ───────────────────────────────────────────────────────────
/// Holds the target device so tensors are created where the model lives.
#[derive(Clone, Debug)]
pub struct PromptBatcher<B: Backend> {
    pub device: B::Device,
}

impl<B: Backend> PromptBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }

    pub fn batch(&self, items: &[&TokenizedExample]) -> PromptBatch<B> {
        let batch_size = items.len();
        let seq_len    = items[0].input_ids.len();

        PromptBatch {
            input_ids:      self.stack(items.iter().map(|ex| ex.input_ids.as_slice()), batch_size, seq_len),
            attention_mask: self.stack(items.iter().map(|ex| ex.attention_mask.as_slice()), batch_size, seq_len),
            loss_ids:       self.stack(items.iter().map(|ex| ex.loss_ids.as_slice()), batch_size, seq_len),
            prompts:        items.iter().map(|ex| ex.real_ids().to_vec()).collect(),
            guids:          items.iter().map(|ex| ex.guid.clone()).collect(),
            tgt_texts:      items.iter().map(|ex| ex.tgt_text.clone()).collect(),
        }
    }

    fn stack<'a>(
        &self,
        rows:       impl Iterator<Item = &'a [u32]>,
        batch_size: usize,
        seq_len:    usize,
    ) -> Tensor<B, 2, Int> {
        let flat: Vec<i32> = rows.flat_map(|row| row.iter().map(|&x| x as i32)).collect();
        Tensor::<B, 1, Int>::from_ints(flat.as_slice(), &self.device).reshape([batch_size, seq_len])
    }
}

// ─── PromptDataLoader ────────────────────────────────────────────────────────
pub struct PromptDataLoader<B: Backend> {
    examples:   Vec<TokenizedExample>,
    batcher:    PromptBatcher<B>,
    batch_size: usize,
    shuffle:    bool,
}

impl<B: Backend> PromptDataLoader<B> {
    pub fn new(
        dataset:    &[InputExample],
        template:   &PromptTemplate,
        tokenizer:  &PromptTokenizer<'_>,
        batch_size: usize,
        shuffle:    bool,
        device:     B::Device,
    ) -> Result<Self> {
        anyhow::ensure!(batch_size > 0, "batch_size must be positive");

        let examples = dataset
            .iter()
            .map(|ex| tokenizer.tokenize_one_example(&template.wrap_one_example(ex)))
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(
            "Tokenised {} examples (teacher_forcing={}, max_seq_length={})",
            examples.len(),
            tokenizer.config().teacher_forcing,
            tokenizer.config().max_seq_length
        );

        Ok(Self { examples, batcher: PromptBatcher::new(device), batch_size, shuffle })
    }

    /// Number of examples
    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    /// ceil(len / batch_size)
    pub fn num_batches(&self) -> usize {
        self.examples.len().div_ceil(self.batch_size)
    }

    pub fn tokenized(&self) -> &[TokenizedExample] {
        &self.examples
    }

    /// One pass over the data. Call again for the next epoch.
    pub fn iter(&self) -> impl Iterator<Item = PromptBatch<B>> + '_ {
        let mut order: Vec<usize> = (0..self.examples.len()).collect();
        if self.shuffle {
            order.shuffle(&mut rand::thread_rng());
        }

        let chunks: Vec<Vec<usize>> = order
            .chunks(self.batch_size)
            .map(<[usize]>::to_vec)
            .collect();

        chunks.into_iter().map(move |idx| {
            let items: Vec<&TokenizedExample> = idx.iter().map(|&i| &self.examples[i]).collect();
            self.batcher.batch(&items)
        })
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::data::tokenize::{TokenizerConfig, TruncateMethod};
    use crate::infra::tokenizer_store::tests::toy_tokenizer;

    type TestBackend = burn::backend::NdArray;

    const TEMPLATE: &str = r#"{"placeholder":"text_a"} Make a sentence {"mask"}"#;

    fn examples(n: usize) -> Vec<InputExample> {
        (0..n)
            .map(|i| InputExample::new(i.to_string(), "alice employer bank", "alice works at bank ."))
            .collect()
    }

    fn loader(n: usize, batch_size: usize, shuffle: bool) -> PromptDataLoader<TestBackend> {
        toy_loader(n, batch_size, shuffle)
    }

    /// `n` identical toy examples, teacher forcing on, 16 tokens per row.
    pub(crate) fn toy_loader<B: Backend>(n: usize, batch_size: usize, shuffle: bool) -> PromptDataLoader<B> {
        let tok    = toy_tokenizer();
        let config = TokenizerConfig {
            max_seq_length:  16,
            teacher_forcing: true,
            truncate_method: TruncateMethod::Head,
            ..TokenizerConfig::default()
        };
        let pt       = PromptTokenizer::new(&tok, config).unwrap();
        let template = PromptTemplate::parse(TEMPLATE).unwrap();
        PromptDataLoader::new(&examples(n), &template, &pt, batch_size, shuffle, Default::default())
            .unwrap()
    }

    #[test]
    fn test_batch_count_is_ceil_of_n_over_batch_size() {
        for (n, bs) in [(1, 4), (4, 4), (5, 4), (9, 2), (10, 3)] {
            let dl = loader(n, bs, false);
            let expected = (n + bs - 1) / bs;
            assert_eq!(dl.num_batches(), expected);
            assert_eq!(dl.iter().count(), expected);
        }
    }

    #[test]
    fn test_last_batch_is_short() {
        let dl      = loader(5, 4, false);
        let batches: Vec<_> = dl.iter().collect();
        assert_eq!(batches[0].len(), 4);
        assert_eq!(batches[1].len(), 1);
        assert_eq!(batches[1].input_ids.dims(), [1, 16]);
    }

    #[test]
    fn test_loader_is_restartable() {
        let dl = loader(6, 4, true);
        for _ in 0..3 {
            let seen: usize = dl.iter().map(|b| b.len()).sum();
            assert_eq!(seen, 6);
        }
    }

    #[test]
    fn test_shuffle_keeps_every_example() {
        let dl = loader(7, 3, true);
        let mut guids: Vec<String> = dl.iter().flat_map(|b| b.guids).collect();
        guids.sort_by_key(|g| g.parse::<usize>().unwrap());
        let expected: Vec<String> = (0..7).map(|i| i.to_string()).collect();
        assert_eq!(guids, expected);
    }

    #[test]
    fn test_batch_tensors_match_tokenized_rows() {
        let dl    = loader(2, 2, false);
        let batch = dl.iter().next().unwrap();

        let ids: Vec<i64> = batch
            .input_ids
            .clone()
            .into_data()
            .convert::<i64>()
            .to_vec::<i64>()
            .unwrap();
        let expected: Vec<i64> = dl.tokenized()[0].input_ids.iter().map(|&x| x as i64).collect();
        assert_eq!(&ids[..16], expected.as_slice());
        assert_eq!(batch.prompts[0].len(), dl.tokenized()[0].real_len);
        assert_eq!(batch.tgt_texts[1], "alice works at bank .");
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        let tok      = toy_tokenizer();
        let pt       = PromptTokenizer::new(&tok, TokenizerConfig::default()).unwrap();
        let template = PromptTemplate::parse(TEMPLATE).unwrap();
        let result   = PromptDataLoader::<TestBackend>::new(
            &examples(2), &template, &pt, 0, false, Default::default(),
        );
        assert!(result.is_err());
    }
}
