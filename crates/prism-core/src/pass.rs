use prism_types::ImageType;

use crate::error::{Error, Result};
use crate::renderer::MAX_COLOR_ATTACHMENTS;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LoadOp {
    #[default]
    Load,
    Clear,
    DontCare,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StoreOp {
    #[default]
    Store,
    DontCare,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ClearValue {
    Color([f32; 4]),
    /// Depth value; stencil clears to 0.
    Depth(f32),
}

#[derive(Clone, Debug, PartialEq)]
pub struct PassAttachmentDesc {
    pub format: ImageType,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    pub clear: ClearValue,
    /// Promote to a 2-layer array image in the multi-view variant of the pass.
    pub automatic_multi_view_transformation: bool,
}

impl PassAttachmentDesc {
    pub fn color(format: ImageType) -> Self {
        Self {
            format,
            load_op: LoadOp::Load,
            store_op: StoreOp::Store,
            clear: ClearValue::Color([0.0, 0.0, 0.0, 0.0]),
            automatic_multi_view_transformation: true,
        }
    }

    pub fn depth(format: ImageType) -> Self {
        Self {
            format,
            load_op: LoadOp::Load,
            store_op: StoreOp::Store,
            clear: ClearValue::Depth(1.0),
            automatic_multi_view_transformation: true,
        }
    }

    pub fn clear(mut self, value: ClearValue) -> Self {
        self.load_op = LoadOp::Clear;
        self.clear = value;
        self
    }

    pub fn load_op(mut self, op: LoadOp) -> Self {
        self.load_op = op;
        self
    }

    pub fn store_op(mut self, op: StoreOp) -> Self {
        self.store_op = op;
        self
    }

    pub fn is_depth(&self) -> bool {
        self.format.is_depth()
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PassDesc {
    pub attachments: Vec<PassAttachmentDesc>,
    /// Build a multi-view variant alongside the single-view one.
    pub automatic_multi_view_handling: bool,
    pub debug_label: Option<String>,
}

impl PassDesc {
    pub fn with_attachment(mut self, attachment: PassAttachmentDesc) -> Self {
        self.attachments.push(attachment);
        self
    }
}

/// Views rendered by a multi-view pass.
pub const MULTI_VIEW_COUNT: u32 = 2;

/// Load/store/clear behavior for one render, split into color and depth attachments.
#[derive(Clone, Debug, PartialEq)]
pub struct PassVariant {
    pub colors: Vec<PassAttachmentDesc>,
    pub depth: Option<PassAttachmentDesc>,
    pub multi_view: bool,
}

impl PassVariant {
    fn new(desc: &PassDesc, multi_view: bool) -> Result<Self> {
        let mut colors = Vec::new();
        let mut depth = None;
        for attachment in &desc.attachments {
            attachment.format.validate()?;
            let mut attachment = attachment.clone();
            if multi_view && attachment.automatic_multi_view_transformation {
                attachment.format = attachment.format.array();
            }
            match (&attachment.clear, attachment.is_depth()) {
                (ClearValue::Depth(_), false) if attachment.load_op == LoadOp::Clear => {
                    return Err(Error::invalid_argument("color attachment with a depth clear value"));
                }
                (ClearValue::Color(_), true) if attachment.load_op == LoadOp::Clear => {
                    return Err(Error::invalid_argument("depth attachment with a color clear value"));
                }
                _ => {}
            }
            if attachment.is_depth() {
                if depth.is_some() {
                    return Err(Error::invalid_argument("a pass has at most one depth attachment"));
                }
                depth = Some(attachment);
            } else {
                colors.push(attachment);
            }
        }
        if colors.len() > MAX_COLOR_ATTACHMENTS {
            return Err(Error::invalid_argument(format!(
                "{} color attachments, at most {MAX_COLOR_ATTACHMENTS} are supported",
                colors.len()
            )));
        }
        Ok(Self {
            colors,
            depth,
            multi_view,
        })
    }
}

/// A render pass with its optional multi-view counterpart; the renderer picks one per frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Pass {
    desc: PassDesc,
    single: PassVariant,
    multi: Option<PassVariant>,
}

impl Pass {
    pub fn new(desc: PassDesc) -> Result<Self> {
        if desc.attachments.is_empty() {
            return Err(Error::invalid_argument("a pass needs at least one attachment"));
        }
        let single = PassVariant::new(&desc, false)?;
        let multi = if desc.automatic_multi_view_handling {
            Some(PassVariant::new(&desc, true)?)
        } else {
            None
        };
        Ok(Self { desc, single, multi })
    }

    pub fn desc(&self) -> &PassDesc {
        &self.desc
    }

    pub fn is_multi_view_capable(&self) -> bool {
        self.multi.is_some()
    }

    pub fn variant(&self, multi_view: bool) -> Result<&PassVariant> {
        if multi_view {
            self.multi
                .as_ref()
                .ok_or_else(|| Error::invalid_argument("pass was created without multi-view handling"))
        } else {
            Ok(&self.single)
        }
    }
}
