/// Builder-style mutation for any sized type, so defaults can be tweaked
/// inline: `PipelineConfig::default().config(|c| c.similarity.high = 95)`.
pub trait Config: Sized {
    fn config(mut self, f: impl FnOnce(&mut Self)) -> Self {
        f(&mut self);
        self
    }
}

impl<T> Config for T {}
