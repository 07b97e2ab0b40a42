//! Interactive leaf selection
//!
//! The dialog side of selection: render the leaf table, read a reply,
//! parse it, re-prompt on bad input. Replies arrive through a small seam
//! so scripted runs and tests drive the same loop without a terminal.

use std::collections::VecDeque;
use std::io::{self, BufRead, Write};

use canopy::{LeafModel, Selection, format_leaf_table, parse_selection};

use crate::error::Result;

/// One round of the selection dialog
pub struct SelectionRequest<'a> {
    models: &'a [LeafModel],
}

impl<'a> SelectionRequest<'a> {
    pub fn new(models: &'a [LeafModel]) -> Self {
        SelectionRequest { models }
    }

    /// Leaf table plus the input line, ready for a terminal
    pub fn render(&self) -> String {
        format!(
            "{}\nSelect leaves (ids, 'all', or 'q' to quit): ",
            format_leaf_table(self.models)
        )
    }
}

/// Source of selection replies
pub trait ReplySource {
    /// Next reply; `None` when input is exhausted
    fn reply(&mut self, request: &SelectionRequest) -> Result<Option<String>>;
}

/// Terminal-backed reply source
pub struct StdinPrompt;

impl ReplySource for StdinPrompt {
    fn reply(&mut self, request: &SelectionRequest) -> Result<Option<String>> {
        let mut stdout = io::stdout();
        stdout.write_all(request.render().as_bytes())?;
        stdout.flush()?;

        let mut line = String::new();
        let n = io::stdin().lock().read_line(&mut line)?;
        Ok((n > 0).then_some(line))
    }
}

/// Canned replies for scripted runs and tests
#[derive(Debug, Default)]
pub struct ScriptedPrompt {
    replies: VecDeque<String>,
}

impl ScriptedPrompt {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ScriptedPrompt {
            replies: replies.into_iter().map(Into::into).collect(),
        }
    }
}

impl ReplySource for ScriptedPrompt {
    fn reply(&mut self, _request: &SelectionRequest) -> Result<Option<String>> {
        Ok(self.replies.pop_front())
    }
}

/// Run the selection dialog until a reply parses
///
/// Bad input warns and re-prompts; exhausted input counts as quitting.
pub fn select_leaves(source: &mut dyn ReplySource, models: &[LeafModel]) -> Result<Selection> {
    let request = SelectionRequest::new(models);
    loop {
        let Some(reply) = source.reply(&request)? else {
            log::info!("Selection input closed, quitting");
            return Ok(Selection::Quit);
        };
        match parse_selection(&reply, models) {
            Ok(selection) => return Ok(selection),
            Err(e) => log::warn!("{e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy::Orientation;
    use nalgebra::{Point3, Vector3};

    fn leaf(id: u32) -> LeafModel {
        LeafModel {
            id,
            point_count: 400,
            centroid: Point3::new(0.0, 0.0, 0.3),
            normal: Vector3::z(),
            inlier_ratio: 0.9,
            target: Point3::new(0.0, 0.0, 0.4),
            orientation: Orientation {
                pan_deg: 0.0,
                tilt_deg: -90.0,
            },
        }
    }

    fn models() -> Vec<LeafModel> {
        vec![leaf(1), leaf(2)]
    }

    #[test]
    fn test_all_selects_every_leaf() {
        let mut source = ScriptedPrompt::new(["all"]);
        let selection = select_leaves(&mut source, &models()).unwrap();
        assert_eq!(selection, Selection::Leaves(vec![1, 2]));
    }

    #[test]
    fn test_quit_reply() {
        let mut source = ScriptedPrompt::new(["q"]);
        let selection = select_leaves(&mut source, &models()).unwrap();
        assert_eq!(selection, Selection::Quit);
    }

    #[test]
    fn test_bad_reply_reprompts_until_valid() {
        // Unknown id, then garbage, then a good pick
        let mut source = ScriptedPrompt::new(["7", "two please", "2"]);
        let selection = select_leaves(&mut source, &models()).unwrap();
        assert_eq!(selection, Selection::Leaves(vec![2]));
    }

    #[test]
    fn test_exhausted_input_quits() {
        let mut source = ScriptedPrompt::new(Vec::<String>::new());
        let selection = select_leaves(&mut source, &models()).unwrap();
        assert_eq!(selection, Selection::Quit);
    }

    #[test]
    fn test_render_shows_table_and_prompt() {
        let models = models();
        let request = SelectionRequest::new(&models);
        let text = request.render();
        assert!(text.contains("ID | Points"));
        assert!(text.contains("Select leaves"));
    }
}
