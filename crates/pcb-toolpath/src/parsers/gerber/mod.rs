mod apertures;
pub mod commands;
pub mod coord;
pub mod interpreter;
pub mod lexer;

use log::{debug, warn};

use crate::error::{ParseError, ParseErrorKind};
use crate::geometry::Segment;

pub use self::interpreter::{Flash, Primitive};

/// Parse a Gerber RS-274X file into primitives, in file order.
pub fn parse(content: &str) -> Result<Vec<Primitive>, ParseError> {
    let tokens = lexer::tokenize(content);
    if tokens.is_empty() {
        return Err(ParseError::new(1, "", ParseErrorKind::Empty));
    }

    let cmds = commands::parse_commands(&tokens)?;
    let primitives = interpreter::interpret(&cmds)?;
    debug!(
        "Gerber: {} tokens, {} commands, {} primitives",
        tokens.len(),
        cmds.len(),
        primitives.len()
    );
    Ok(primitives)
}

/// The board-edge draws of a primitive list. Flashes contribute no boundary
/// and are reported once.
pub fn edge_segments(primitives: &[Primitive]) -> Vec<Segment> {
    let mut flashes = 0usize;
    let segments: Vec<Segment> = primitives
        .iter()
        .filter_map(|p| match p {
            Primitive::Draw(seg) => Some(*seg),
            Primitive::Flash(_) => {
                flashes += 1;
                None
            }
        })
        .collect();
    if flashes > 0 {
        warn!("Gerber: ignoring {flashes} flash(es) on the board edge layer");
    }
    segments
}
