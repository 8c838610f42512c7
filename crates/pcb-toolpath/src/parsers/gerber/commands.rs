use crate::error::{ParseError, ParseErrorKind};

use super::coord::{CoordinateFormat, Units};
use super::lexer::{GerberToken, Lexed};

/// Aperture shape template from an %AD command.
#[derive(Debug, Clone, PartialEq)]
pub enum ApertureTemplate {
    Circle {
        diameter: f64,
    },
    Rectangle {
        x_size: f64,
        y_size: f64,
    },
    Obround {
        x_size: f64,
        y_size: f64,
    },
    Polygon {
        outer_diameter: f64,
        num_vertices: u32,
        rotation: f64,
    },
    /// Reference to a user-defined aperture macro.
    Macro {
        name: String,
        params: Vec<f64>,
    },
}

/// Layer polarity from %LP command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    Dark,
    Clear,
}

/// Parsed Gerber X2 FileFunction attribute. Only the profile (board edge)
/// function matters here.
#[derive(Debug, Clone, PartialEq)]
pub enum FileFunction {
    Profile,
    Other(String),
}

/// A fully parsed Gerber command.
#[derive(Debug, Clone, PartialEq)]
pub enum GerberCommand {
    /// %FS - Format specification
    FormatSpec(CoordinateFormat),
    /// %MO, G70, G71 - Unit mode
    Units(Units),
    /// %AD - Aperture definition
    ApertureDefine {
        code: u32,
        template: ApertureTemplate,
    },
    /// Dnn (n >= 10) - Select aperture
    SelectAperture(u32),
    /// D01 - Interpolate (draw)
    Interpolate {
        x: Option<i64>,
        y: Option<i64>,
        i: Option<i64>,
        j: Option<i64>,
    },
    /// D02 - Move
    Move { x: Option<i64>, y: Option<i64> },
    /// D03 - Flash
    Flash { x: Option<i64>, y: Option<i64> },
    /// Coordinates without a D-code: repeat the previous operation.
    Coordinates {
        x: Option<i64>,
        y: Option<i64>,
        i: Option<i64>,
        j: Option<i64>,
    },
    /// G01 - Linear interpolation mode
    LinearMode,
    /// G02 - Clockwise circular interpolation
    ClockwiseArcMode,
    /// G03 - Counter-clockwise circular interpolation
    CounterClockwiseArcMode,
    /// G36 - Begin region
    RegionBegin,
    /// G37 - End region
    RegionEnd,
    /// G74 - Single quadrant arc mode
    SingleQuadrant,
    /// G75 - Multi quadrant arc mode
    MultiQuadrant,
    /// G90 - Absolute coordinates
    AbsoluteMode,
    /// G91 - Incremental coordinates
    IncrementalMode,
    /// %LP - Layer polarity
    Polarity(Polarity),
    /// %TF.FileFunction - Gerber X2 file function attribute
    FileFunction(FileFunction),
    /// %SR - Step-and-repeat block. 1×1 closes or resets a block.
    StepRepeat { x_repeat: u32, y_repeat: u32 },
    /// M02 / M00 - End of file
    EndOfFile,
}

/// A command with the source position it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Located {
    pub command: GerberCommand,
    pub line: usize,
    pub text: String,
}

impl Located {
    pub fn error(&self, kind: ParseErrorKind) -> ParseError {
        ParseError::new(self.line, self.text.clone(), kind)
    }
}

/// Parse a token stream into a sequence of Gerber commands.
pub fn parse_commands(tokens: &[Lexed]) -> Result<Vec<Located>, ParseError> {
    let mut commands = Vec::new();
    let mut in_macro = false;

    for lexed in tokens {
        let text = lexed.token.text();
        let err = |kind| ParseError::new(lexed.line, text, kind);

        let parsed = match &lexed.token {
            GerberToken::Extended(content) => {
                // Macro bodies are not evaluated; flashes only record the name.
                if content.starts_with("AM") && content.len() > 2 {
                    in_macro = true;
                    continue;
                }
                if in_macro {
                    let trimmed = content.trim();
                    if trimmed.starts_with(|c: char| c.is_ascii_digit() || c == '$') {
                        continue;
                    }
                    in_macro = false;
                }
                parse_extended(content)
                    .map_err(err)?
                    .into_iter()
                    .collect::<Vec<_>>()
            }
            GerberToken::Word(word) => {
                in_macro = false;
                parse_word(word).map_err(err)?
            }
        };

        commands.extend(parsed.into_iter().map(|command| Located {
            command,
            line: lexed.line,
            text: text.to_string(),
        }));
    }

    Ok(commands)
}

/// Extended commands accepted as no-ops when they carry identity values.
const IDENTITY_EXTENDED: &[&str] = &[
    "IPPOS", "MIA0B0", "MIA0", "MIB0", "SFA1B1", "SFA1.0B1.0", "OFA0B0", "OFA0.0B0.0", "IR0",
    "ASAXBY",
];

/// Parse an extended command (content between % delimiters).
fn parse_extended(content: &str) -> Result<Option<GerberCommand>, ParseErrorKind> {
    if content.starts_with("FS") {
        return parse_format_spec(content).map(Some);
    }
    if content == "MOMM" {
        return Ok(Some(GerberCommand::Units(Units::Millimeters)));
    }
    if content == "MOIN" {
        return Ok(Some(GerberCommand::Units(Units::Inches)));
    }
    if content.starts_with("AD") {
        return parse_aperture_define(content).map(Some);
    }
    if content == "LPD" {
        return Ok(Some(GerberCommand::Polarity(Polarity::Dark)));
    }
    if content == "LPC" {
        return Ok(Some(GerberCommand::Polarity(Polarity::Clear)));
    }
    if let Some(rest) = content.strip_prefix("TF.FileFunction,") {
        return Ok(Some(parse_file_function(rest)));
    }
    if content.starts_with("SR") {
        return parse_step_repeat(content).map(Some);
    }
    // X2 attributes and layer names carry no geometry.
    if ["TF", "TA", "TO", "TD", "LN", "IN"]
        .iter()
        .any(|prefix| content.starts_with(prefix))
    {
        return Ok(None);
    }
    if IDENTITY_EXTENDED.contains(&content) {
        return Ok(None);
    }
    if ["MI", "SF", "OF", "IR", "AS", "IP", "AB", "LM", "LR", "LS"]
        .iter()
        .any(|prefix| content.starts_with(prefix))
    {
        return Err(ParseErrorKind::Unsupported(format!(
            "image transform or block aperture `{content}`"
        )));
    }
    Err(ParseErrorKind::UnknownCommand)
}

/// Parse %FS command. Example: `FSLAX24Y24`
fn parse_format_spec(content: &str) -> Result<GerberCommand, ParseErrorKind> {
    // Expected format: FS[L|T][A|I]X<n><m>Y<n><m>
    let s = &content[2..];
    let x_pos = s
        .find('X')
        .ok_or(ParseErrorKind::MissingField("X format"))?;
    let y_pos = s
        .find('Y')
        .ok_or(ParseErrorKind::MissingField("Y format"))?;
    if y_pos < x_pos {
        return Err(ParseErrorKind::InvalidNumber(s.to_string()));
    }

    let modes = &s[..x_pos];
    if modes.contains('T') {
        return Err(ParseErrorKind::Unsupported(
            "trailing zero omission".to_string(),
        ));
    }
    if modes.contains('I') {
        return Err(ParseErrorKind::Unsupported(
            "incremental coordinates".to_string(),
        ));
    }

    let (x_integer, x_decimal) = parse_format_digits(&s[x_pos + 1..y_pos])?;
    let (y_integer, y_decimal) = parse_format_digits(&s[y_pos + 1..])?;

    Ok(GerberCommand::FormatSpec(CoordinateFormat {
        x_integer,
        x_decimal,
        y_integer,
        y_decimal,
    }))
}

fn parse_format_digits(part: &str) -> Result<(u8, u8), ParseErrorKind> {
    let bad = || ParseErrorKind::InvalidNumber(part.to_string());
    let mut digits = part.chars().map(|c| c.to_digit(10));
    match (digits.next(), digits.next(), digits.next()) {
        (Some(Some(integer)), Some(Some(decimal)), None) => Ok((integer as u8, decimal as u8)),
        _ => Err(bad()),
    }
}

/// Parse %AD command. Example: `ADD10C,0.020` or `ADD11R,0.040X0.020`
fn parse_aperture_define(content: &str) -> Result<GerberCommand, ParseErrorKind> {
    let s = content[2..]
        .strip_prefix('D')
        .ok_or(ParseErrorKind::MissingField("aperture D-code"))?;

    // Find where the code ends and the template type begins
    let type_pos = s
        .find(|c: char| !c.is_ascii_digit())
        .ok_or(ParseErrorKind::MissingField("aperture template"))?;

    let code: u32 = s[..type_pos]
        .parse()
        .map_err(|_| ParseErrorKind::InvalidNumber(s[..type_pos].to_string()))?;
    if code < 10 {
        return Err(ParseErrorKind::InvalidNumber(format!("D{code}")));
    }

    let template = parse_aperture_template(&s[type_pos..])?;
    Ok(GerberCommand::ApertureDefine { code, template })
}

/// Parse aperture template. Example: `C,0.020` or `R,0.040X0.020`
fn parse_aperture_template(s: &str) -> Result<ApertureTemplate, ParseErrorKind> {
    let (type_name, params_str) = match s.find(',') {
        Some(comma_pos) => (&s[..comma_pos], &s[comma_pos + 1..]),
        None => (s, ""),
    };

    let params: Vec<f64> = if params_str.is_empty() {
        Vec::new()
    } else {
        params_str
            .split('X')
            .map(|p| {
                p.parse::<f64>()
                    .map_err(|_| ParseErrorKind::InvalidNumber(p.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?
    };

    match type_name {
        "C" => {
            let diameter = params
                .first()
                .copied()
                .ok_or(ParseErrorKind::MissingField("circle diameter"))?;
            Ok(ApertureTemplate::Circle { diameter })
        }
        "R" | "O" => {
            if params.len() < 2 {
                return Err(ParseErrorKind::MissingField("aperture x and y size"));
            }
            let (x_size, y_size) = (params[0], params[1]);
            Ok(if type_name == "R" {
                ApertureTemplate::Rectangle { x_size, y_size }
            } else {
                ApertureTemplate::Obround { x_size, y_size }
            })
        }
        "P" => {
            if params.len() < 2 {
                return Err(ParseErrorKind::MissingField(
                    "polygon diameter and vertex count",
                ));
            }
            Ok(ApertureTemplate::Polygon {
                outer_diameter: params[0],
                num_vertices: params[1] as u32,
                rotation: params.get(2).copied().unwrap_or(0.0),
            })
        }
        _ => Ok(ApertureTemplate::Macro {
            name: type_name.to_string(),
            params,
        }),
    }
}

fn parse_file_function(rest: &str) -> GerberCommand {
    let func = match rest.split(',').next() {
        Some("Profile") => FileFunction::Profile,
        Some(other) => FileFunction::Other(other.to_string()),
        None => FileFunction::Other(String::new()),
    };
    GerberCommand::FileFunction(func)
}

/// Parse %SR command.  Example: `SRX3Y2I5.0J10.0` or bare `SR` (close/reset).
fn parse_step_repeat(content: &str) -> Result<GerberCommand, ParseErrorKind> {
    let s = &content[2..];
    let x_repeat = parse_sr_uint(s, 'X')?.unwrap_or(1);
    let y_repeat = parse_sr_uint(s, 'Y')?.unwrap_or(1);
    Ok(GerberCommand::StepRepeat { x_repeat, y_repeat })
}

/// Extract the unsigned integer after a given key letter in a SR parameter string.
fn parse_sr_uint(s: &str, key: char) -> Result<Option<u32>, ParseErrorKind> {
    let Some(pos) = s.find(key) else {
        return Ok(None);
    };
    let after = &s[pos + 1..];
    let end = after
        .find(|c: char| c.is_alphabetic())
        .unwrap_or(after.len());
    after[..end]
        .parse()
        .map(Some)
        .map_err(|_| ParseErrorKind::InvalidNumber(after[..end].to_string()))
}

/// Parse a word command (e.g., "D10", "X100Y200D01", "G01", "M02").
///
/// A single word may contain an embedded G-code prefix (e.g., "G01X100Y200D01").
fn parse_word(word: &str) -> Result<Vec<GerberCommand>, ParseErrorKind> {
    let mut commands = Vec::new();
    let mut remaining = word;

    // Handle leading G-code if present
    if remaining.starts_with(['G', 'g']) {
        let g_end = remaining[1..]
            .find(|c: char| !c.is_ascii_digit())
            .map(|i| i + 1)
            .unwrap_or(remaining.len());
        if let Some(cmd) = parse_g_code(&remaining[..g_end])? {
            commands.push(cmd);
        }
        remaining = &remaining[g_end..];
        if remaining.is_empty() {
            return Ok(commands);
        }
    }

    // Handle M-code
    if let Some(code) = remaining.strip_prefix(['M', 'm']) {
        match code.parse::<u32>() {
            Ok(0) | Ok(2) => commands.push(GerberCommand::EndOfFile),
            Ok(1) => {} // optional stop
            _ => return Err(ParseErrorKind::UnknownCommand),
        }
        return Ok(commands);
    }

    // Parse coordinate/D-code word: optional X, Y, I, J values followed by D code
    let mut x: Option<i64> = None;
    let mut y: Option<i64> = None;
    let mut i: Option<i64> = None;
    let mut j: Option<i64> = None;
    let mut d_code: Option<u32> = None;

    let s = remaining;
    let mut pos = 0;
    let bytes = s.as_bytes();

    while pos < bytes.len() {
        let key = (bytes[pos] as char).to_ascii_uppercase();
        pos += 1;

        match key {
            'X' | 'Y' | 'I' | 'J' => {
                let start = pos;
                // Read optional sign and digits
                if pos < bytes.len() && (bytes[pos] == b'+' || bytes[pos] == b'-') {
                    pos += 1;
                }
                while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                    pos += 1;
                }
                let val: i64 = s[start..pos]
                    .parse()
                    .map_err(|_| ParseErrorKind::InvalidNumber(s[start..].to_string()))?;
                match key {
                    'X' => x = Some(val),
                    'Y' => y = Some(val),
                    'I' => i = Some(val),
                    _ => j = Some(val),
                }
            }
            'D' => {
                let start = pos;
                while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                    pos += 1;
                }
                d_code = Some(
                    s[start..pos]
                        .parse()
                        .map_err(|_| ParseErrorKind::InvalidNumber(s[start - 1..].to_string()))?,
                );
            }
            _ => return Err(ParseErrorKind::UnknownCommand),
        }
    }

    match d_code {
        Some(1) => commands.push(GerberCommand::Interpolate { x, y, i, j }),
        Some(2) => commands.push(GerberCommand::Move { x, y }),
        Some(3) => commands.push(GerberCommand::Flash { x, y }),
        Some(code) if code >= 10 => commands.push(GerberCommand::SelectAperture(code)),
        Some(_) => return Err(ParseErrorKind::UnknownCommand),
        None => {
            if x.is_some() || y.is_some() || i.is_some() || j.is_some() {
                commands.push(GerberCommand::Coordinates { x, y, i, j });
            } else if commands.is_empty() {
                return Err(ParseErrorKind::UnknownCommand);
            }
        }
    }

    Ok(commands)
}

/// Parse a G-code string. `Ok(None)` for accepted codes with no effect.
fn parse_g_code(s: &str) -> Result<Option<GerberCommand>, ParseErrorKind> {
    let code: u32 = s[1..]
        .parse()
        .map_err(|_| ParseErrorKind::UnknownCommand)?;
    let cmd = match code {
        1 => GerberCommand::LinearMode,
        2 => GerberCommand::ClockwiseArcMode,
        3 => GerberCommand::CounterClockwiseArcMode,
        36 => GerberCommand::RegionBegin,
        37 => GerberCommand::RegionEnd,
        74 => GerberCommand::SingleQuadrant,
        75 => GerberCommand::MultiQuadrant,
        70 => GerberCommand::Units(Units::Inches),
        71 => GerberCommand::Units(Units::Millimeters),
        90 => GerberCommand::AbsoluteMode,
        91 => GerberCommand::IncrementalMode,
        // Deprecated aperture-select prefixes
        54 | 55 => return Ok(None),
        _ => return Err(ParseErrorKind::UnknownCommand),
    };
    Ok(Some(cmd))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::gerber::lexer::tokenize;

    fn parse(input: &str) -> Vec<GerberCommand> {
        parse_commands(&tokenize(input))
            .unwrap()
            .into_iter()
            .map(|l| l.command)
            .collect()
    }

    fn parse_err(input: &str) -> ParseError {
        parse_commands(&tokenize(input)).unwrap_err()
    }

    #[test]
    fn test_format_spec() {
        let cmds = parse("%FSLAX46Y46*%\n");
        assert_eq!(
            cmds,
            vec![GerberCommand::FormatSpec(CoordinateFormat {
                x_integer: 4,
                x_decimal: 6,
                y_integer: 4,
                y_decimal: 6,
            })]
        );
    }

    #[test]
    fn test_format_spec_bad_digits() {
        for text in ["%FSLAX\u{e9}Y46*%\n", "%FSLAX4Y46*%\n", "%FSLAX46Y467*%\n", "%FSLAX4aY46*%\n"] {
            let err = parse_err(text);
            assert!(matches!(err.kind, ParseErrorKind::InvalidNumber(_)), "{text}");
            assert_eq!(err.line, 1);
        }
    }

    #[test]
    fn test_format_spec_trailing_zero_rejected() {
        let err = parse_err("%FSTAX24Y24*%\n");
        assert!(matches!(err.kind, ParseErrorKind::Unsupported(_)));
        assert_eq!(err.line, 1);
    }

    #[test]
    fn test_format_spec_incremental_rejected() {
        let err = parse_err("%FSLIX24Y24*%\n");
        assert!(matches!(err.kind, ParseErrorKind::Unsupported(_)));
    }

    #[test]
    fn test_units() {
        assert_eq!(
            parse("%MOMM*%\n"),
            vec![GerberCommand::Units(Units::Millimeters)]
        );
        assert_eq!(parse("%MOIN*%\n"), vec![GerberCommand::Units(Units::Inches)]);
        assert_eq!(parse("G70*\n"), vec![GerberCommand::Units(Units::Inches)]);
    }

    #[test]
    fn test_aperture_define() {
        assert_eq!(
            parse("%ADD10C,0.020*%\n"),
            vec![GerberCommand::ApertureDefine {
                code: 10,
                template: ApertureTemplate::Circle { diameter: 0.020 },
            }]
        );
        assert_eq!(
            parse("%ADD11R,0.040X0.020*%\n"),
            vec![GerberCommand::ApertureDefine {
                code: 11,
                template: ApertureTemplate::Rectangle {
                    x_size: 0.040,
                    y_size: 0.020,
                },
            }]
        );
        assert_eq!(
            parse("%ADD13P,0.080X6*%\n"),
            vec![GerberCommand::ApertureDefine {
                code: 13,
                template: ApertureTemplate::Polygon {
                    outer_diameter: 0.080,
                    num_vertices: 6,
                    rotation: 0.0,
                },
            }]
        );
    }

    #[test]
    fn test_macro_body_skipped_and_reference_kept() {
        let cmds = parse("%AMOC8*5,1,8,0,0,1.08239X$1,22.5*%\n%ADD22OC8,0.1*%\n");
        assert_eq!(
            cmds,
            vec![GerberCommand::ApertureDefine {
                code: 22,
                template: ApertureTemplate::Macro {
                    name: "OC8".into(),
                    params: vec![0.1],
                },
            }]
        );
    }

    #[test]
    fn test_operations() {
        assert_eq!(parse("D10*\n"), vec![GerberCommand::SelectAperture(10)]);
        assert_eq!(
            parse("X100Y200D02*\n"),
            vec![GerberCommand::Move {
                x: Some(100),
                y: Some(200),
            }]
        );
        assert_eq!(
            parse("X100Y200D03*\n"),
            vec![GerberCommand::Flash {
                x: Some(100),
                y: Some(200),
            }]
        );
        assert_eq!(
            parse("X200Y100I50J-30D01*\n"),
            vec![GerberCommand::Interpolate {
                x: Some(200),
                y: Some(100),
                i: Some(50),
                j: Some(-30),
            }]
        );
    }

    #[test]
    fn test_g_code_with_coords() {
        assert_eq!(
            parse("G01X100Y200D01*\n"),
            vec![
                GerberCommand::LinearMode,
                GerberCommand::Interpolate {
                    x: Some(100),
                    y: Some(200),
                    i: None,
                    j: None,
                },
            ]
        );
    }

    #[test]
    fn test_g54_prefix_accepted() {
        assert_eq!(parse("G54D10*\n"), vec![GerberCommand::SelectAperture(10)]);
    }

    #[test]
    fn test_bare_coordinates() {
        assert_eq!(
            parse("X5Y6*\n"),
            vec![GerberCommand::Coordinates {
                x: Some(5),
                y: Some(6),
                i: None,
                j: None,
            }]
        );
    }

    #[test]
    fn test_attributes_ignored() {
        let cmds = parse("%TF.GenerationSoftware,KiCad*%\n%TA.AperFunction,Profile*%\n%TD*%\n");
        assert!(cmds.is_empty());
        assert_eq!(
            parse("%TF.FileFunction,Profile,NP*%\n"),
            vec![GerberCommand::FileFunction(FileFunction::Profile)]
        );
    }

    #[test]
    fn test_unknown_g_code_rejected() {
        let err = parse_err("%MOMM*%\nG12*\n");
        assert_eq!(err.kind, ParseErrorKind::UnknownCommand);
        assert_eq!(err.line, 2);
        assert_eq!(err.command, "G12");
    }

    #[test]
    fn test_unknown_extended_rejected() {
        let err = parse_err("%XYZ*%\n");
        assert_eq!(err.kind, ParseErrorKind::UnknownCommand);
    }

    #[test]
    fn test_garbage_word_rejected() {
        let err = parse_err("X10Q5D01*\n");
        assert_eq!(err.kind, ParseErrorKind::UnknownCommand);
    }

    #[test]
    fn test_invalid_number() {
        let err = parse_err("X1.5Y2D01*\n");
        assert!(matches!(err.kind, ParseErrorKind::InvalidNumber(_)));
    }

    #[test]
    fn test_step_repeat() {
        assert_eq!(
            parse("%SRX3Y2I5.0J10.0*%\n"),
            vec![GerberCommand::StepRepeat {
                x_repeat: 3,
                y_repeat: 2,
            }]
        );
        assert_eq!(
            parse("%SR*%\n"),
            vec![GerberCommand::StepRepeat {
                x_repeat: 1,
                y_repeat: 1,
            }]
        );
    }

    #[test]
    fn test_end_of_file() {
        assert_eq!(parse("M02*\n"), vec![GerberCommand::EndOfFile]);
    }
}
