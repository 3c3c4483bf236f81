/// Settings for [`compile`](crate::compile), passed explicitly through every stage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompileOptions {
    /// Whether to simplify the expression tree before generating code.
    pub optimize: bool,
    /// Whether alternations with distinct leading tokens become a single dispatch.
    pub dispatch_tables: bool,
    /// Whether repetition of a single-token matcher becomes one instruction.
    pub fuse_repetition: bool,
    /// Whether adjacent instructions are fused after code generation.
    pub fuse_instructions: bool,
    /// Subroutines with at most this many instructions are inlined. Zero disables inlining.
    pub inline_threshold: usize,
    /// Upper bound on the number of rewrite passes of every fixpoint loop.
    pub max_passes: usize,
}

impl CompileOptions {
    /// Options that turn every optimization off. Useful as a reference when
    /// checking that optimizations do not change results.
    pub fn unoptimized() -> Self {
        Self {
            optimize: false,
            dispatch_tables: false,
            fuse_repetition: false,
            fuse_instructions: false,
            inline_threshold: 0,
            ..Self::default()
        }
    }

    pub fn with_optimize(mut self, optimize: bool) -> Self {
        self.optimize = optimize;
        self
    }

    pub fn with_dispatch_tables(mut self, dispatch_tables: bool) -> Self {
        self.dispatch_tables = dispatch_tables;
        self
    }

    pub fn with_fuse_repetition(mut self, fuse_repetition: bool) -> Self {
        self.fuse_repetition = fuse_repetition;
        self
    }

    pub fn with_fuse_instructions(mut self, fuse_instructions: bool) -> Self {
        self.fuse_instructions = fuse_instructions;
        self
    }

    pub fn with_inline_threshold(mut self, inline_threshold: usize) -> Self {
        self.inline_threshold = inline_threshold;
        self
    }

    pub fn with_max_passes(mut self, max_passes: usize) -> Self {
        self.max_passes = max_passes.max(1);
        self
    }
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            optimize: true,
            dispatch_tables: true,
            fuse_repetition: true,
            fuse_instructions: true,
            inline_threshold: 4,
            max_passes: 8,
        }
    }
}
