#[derive(Debug)]
pub struct IdCounter {
    value: u64,
}

impl IdCounter {
    #[inline]
    pub fn new(initial_value: u64) -> Self {
        Self {
            value: initial_value,
        }
    }

    #[inline]
    pub fn increment(&mut self) -> u64 {
        let value = self.value;
        self.value += 1;
        value
    }

    #[inline]
    pub fn set_if_larger(&mut self, value: u64) {
        self.value = self.value.max(value);
    }
}

impl Default for IdCounter {
    fn default() -> Self {
        Self::new(1)
    }
}
