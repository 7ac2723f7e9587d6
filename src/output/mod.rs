mod response;

pub use response::emit;

/// Human-readable rendering used when `--json` is not given.
pub trait TextOutput {
    fn render_text(&self) -> String;
}
