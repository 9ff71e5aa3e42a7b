/// The shader-compilation collaborator this crate needs from its host
/// application: turn a named shader source into SPIR-V words ready for
/// `vkCreateShaderModule`.
///
/// This system takes raw SPIR-V at the `Device` boundary rather than
/// bundling a translator the way `wgpu-hal` bundles `naga` — the bindless
/// pipeline layout is fixed, so there's no per-draw shader-variant
/// validation to do here, only "get me the words for this entry point".
/// Implementations can wrap `shaderc`, `naga`, or an offline-compiled blob
/// cache; this crate only needs the result.
pub trait ShaderCompiler {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Compile (or look up) `name` and return its SPIR-V words.
    fn compile(&self, name: &str) -> Result<Vec<u32>, Self::Error>;
}
