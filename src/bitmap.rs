// PRIORITY BITMAP
// ONE BIT PER CLASS QUEUE BUCKET. SET == BUCKET NON-EMPTY.
// FORWARD SEARCH IS O(WORDS): 2 WORDS FOR THE DEFAULT 128-SLOT QUEUE.

const WORD_BITS: usize = u64::BITS as usize;

#[derive(Clone, Debug)]
pub struct PrioBitmap {
    words: Box<[u64]>,
    nbits: usize,
}

impl PrioBitmap {
    pub fn new(nbits: usize) -> Self {
        let nwords = nbits.div_ceil(WORD_BITS).max(1);
        Self {
            words: vec![0u64; nwords].into_boxed_slice(),
            nbits,
        }
    }

    pub fn len(&self) -> usize {
        self.nbits
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    pub fn set(&mut self, bit: usize) {
        debug_assert!(bit < self.nbits);
        self.words[bit / WORD_BITS] |= 1u64 << (bit % WORD_BITS);
    }

    pub fn clear(&mut self, bit: usize) {
        debug_assert!(bit < self.nbits);
        self.words[bit / WORD_BITS] &= !(1u64 << (bit % WORD_BITS));
    }

    pub fn test(&self, bit: usize) -> bool {
        if bit >= self.nbits {
            return false;
        }
        self.words[bit / WORD_BITS] & (1u64 << (bit % WORD_BITS)) != 0
    }

    pub fn clear_all(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
    }

    // FIRST SET BIT AT OR AFTER `from`. NONE IF THE TAIL IS EMPTY.
    pub fn find_next_set_from(&self, from: usize) -> Option<usize> {
        if from >= self.nbits {
            return None;
        }
        let mut word_idx = from / WORD_BITS;
        // MASK OFF BITS BELOW `from` IN THE FIRST WORD
        let mut word = self.words[word_idx] & (!0u64 << (from % WORD_BITS));
        loop {
            if word != 0 {
                let bit = word_idx * WORD_BITS + word.trailing_zeros() as usize;
                return if bit < self.nbits { Some(bit) } else { None };
            }
            word_idx += 1;
            if word_idx >= self.words.len() {
                return None;
            }
            word = self.words[word_idx];
        }
    }

    pub fn find_first_set(&self) -> Option<usize> {
        self.find_next_set_from(0)
    }

    // CIRCULAR SEARCH: [from, END) THEN WRAP TO [0, from)
    pub fn find_next_set_circular(&self, from: usize) -> Option<usize> {
        self.find_next_set_from(from)
            .or_else(|| self.find_first_set())
    }
}
