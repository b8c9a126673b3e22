use super::stages::Stage;

/// Receives lowered stages in execution order.
pub trait Pipeline {
    fn append(&mut self, stage: Stage);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hosts that dispatch stages with tail calls never need `stack_rewind`.
    fn supports_tail_calls(&self) -> bool {
        false
    }
}

/// Host hooks for the ops that call out of the generated program. The
/// handles are opaque child indices assigned in declaration order.
pub trait Callbacks {
    /// Samples child shader `index` at the coordinates in `src.rg`.
    fn append_shader(&mut self, index: usize, pipeline: &mut dyn Pipeline) -> bool;

    /// Filters the color in `src`.
    fn append_color_filter(&mut self, index: usize, pipeline: &mut dyn Pipeline) -> bool;

    /// Blends `src` over `dst`.
    fn append_blender(&mut self, index: usize, pipeline: &mut dyn Pipeline) -> bool;

    fn to_linear_srgb(&mut self, pipeline: &mut dyn Pipeline);

    fn from_linear_srgb(&mut self, pipeline: &mut dyn Pipeline);
}

/// Collects stages into a list.
#[derive(Debug, Default)]
pub struct StageList {
    pub stages: Vec<Stage>,
}

impl Pipeline for StageList {
    fn append(&mut self, stage: Stage) {
        self.stages.push(stage);
    }

    fn len(&self) -> usize {
        self.stages.len()
    }
}
