use log::debug;

use crate::drill::{DrillHit, SlotRoute, ToolId, ToolTable};
use crate::error::{ParseError, ParseErrorKind};
use crate::geometry::Point;

/// Zero suppression mode, named after the zeros that are *kept*.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ZeroSuppression {
    /// Trailing zeros kept, leading zeros omitted: digits are right-aligned.
    Trailing,
    /// Leading zeros kept, trailing zeros omitted: digits are left-aligned.
    Leading,
}

/// Coordinate format: how many integer and decimal digits.
#[derive(Debug, Clone, Copy)]
struct CoordFormat {
    integer: u8,
    decimal: u8,
}

/// A parsed Excellon drill file.
#[derive(Debug, Clone, Default)]
pub struct ExcellonFile {
    pub tools: ToolTable,
    /// Hits in file order.
    pub hits: Vec<DrillHit>,
    /// Routed slots in file order.
    pub routes: Vec<SlotRoute>,
}

struct Parser {
    zero_sup: ZeroSuppression,
    format: CoordFormat,
    in_header: bool,
    current_tool: Option<ToolId>,
    position: (Option<f64>, Option<f64>),
    /// Set by `G00`/`G01`; bare coordinates then move instead of drilling.
    routing: bool,
    /// Slot being cut between `M15` and `M16`.
    route: Option<SlotRoute>,
    file: ExcellonFile,
}

/// Parse a metric Excellon drill file.
pub fn parse(content: &str) -> Result<ExcellonFile, ParseError> {
    let mut parser = Parser {
        zero_sup: ZeroSuppression::Trailing,
        format: CoordFormat {
            integer: 3,
            decimal: 3,
        },
        in_header: false,
        current_tool: None,
        position: (None, None),
        routing: false,
        route: None,
        file: ExcellonFile::default(),
    };

    let mut saw_command = false;
    for (idx, raw) in content.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.split(';').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        saw_command = true;
        let upper = line.to_ascii_uppercase();
        let err = |kind| ParseError::new(line_no, line, kind);

        // End of program
        if upper == "M30" || upper == "M00" {
            break;
        }
        parser.line(&upper, line_no).map_err(err)?;
    }

    if !saw_command {
        return Err(ParseError::new(1, "", ParseErrorKind::Empty));
    }
    parser.close_route();

    debug!(
        "Excellon: {} tools, {} hits, {} slots",
        parser.file.tools.len(),
        parser.file.hits.len(),
        parser.file.routes.len()
    );
    Ok(parser.file)
}

impl Parser {
    fn line(&mut self, line: &str, line_no: usize) -> Result<(), ParseErrorKind> {
        match line {
            "M48" => {
                self.in_header = true;
                return Ok(());
            }
            "%" | "M95" => {
                self.in_header = false;
                return Ok(());
            }
            _ => {}
        }

        if line.starts_with("INCH") || line == "M72" {
            return Err(ParseErrorKind::UnsupportedUnits("inch".to_string()));
        }
        if line.starts_with("METRIC") || line == "M71" {
            self.parse_format_options(line);
            return Ok(());
        }

        // Tool definitions may appear in the header or inline in the body.
        if let Some(rest) = line.strip_prefix('T') {
            if rest.contains('C') {
                return self.define_tool(rest);
            }
            if !self.in_header {
                return self.select_tool(rest);
            }
        }

        if self.in_header {
            // Header options such as FMAT, VER, ICI=OFF or ATC carry nothing we use.
            if line.starts_with("ICI,ON") || line.starts_with("ICI=ON") {
                return Err(ParseErrorKind::Unsupported(
                    "incremental coordinates".to_string(),
                ));
            }
            debug!("Excellon: line {line_no}: ignoring header line `{line}`");
            return Ok(());
        }

        if line.starts_with("G02") || line.starts_with("G03") {
            return Err(ParseErrorKind::Unsupported("routed arcs".to_string()));
        }
        if let Some(rest) = line.strip_prefix("G00") {
            // Rapid with the tool up
            self.close_route();
            self.routing = true;
            if !rest.is_empty() {
                self.coords(rest)?;
            }
            return Ok(());
        }
        if let Some(rest) = line.strip_prefix("G01") {
            self.routing = true;
            if rest.is_empty() {
                return Ok(());
            }
            return self.route_to(rest);
        }
        if line.starts_with("M15") {
            return self.plunge(line_no);
        }
        if line.starts_with("M16") || line.starts_with("M17") {
            self.close_route();
            return Ok(());
        }
        if let Some((from, to)) = line.split_once("G85") {
            return self.canned_slot(from, to, line_no);
        }
        if line.starts_with('X') || line.starts_with('Y') {
            if self.routing {
                return self.route_to(line);
            }
            return self.hit(line, line_no);
        }

        if line.starts_with("G91") {
            return Err(ParseErrorKind::Unsupported(
                "incremental coordinates".to_string(),
            ));
        }
        if line.starts_with("G05") {
            self.close_route();
            self.routing = false;
            return Ok(());
        }
        // Absolute mode and no-op markers
        if ["G90", "G81", "M70", "M47"]
            .iter()
            .any(|code| line.starts_with(code))
        {
            return Ok(());
        }

        Err(ParseErrorKind::UnknownCommand)
    }

    /// Parse options like "METRIC,TZ,000.000"
    fn parse_format_options(&mut self, line: &str) {
        for part in line.split(',') {
            let part = part.trim();
            match part {
                "TZ" => self.zero_sup = ZeroSuppression::Trailing,
                "LZ" => self.zero_sup = ZeroSuppression::Leading,
                _ => {
                    if part.contains('.') && part.chars().all(|c| c == '0' || c == '.') {
                        if let Some(dot_pos) = part.find('.') {
                            let int_digits = dot_pos as u8;
                            let dec_digits = (part.len() - dot_pos - 1) as u8;
                            if int_digits > 0 && dec_digits > 0 {
                                self.format = CoordFormat {
                                    integer: int_digits,
                                    decimal: dec_digits,
                                };
                            }
                        }
                    }
                }
            }
        }
    }

    /// `T01C0.300`, optionally followed by feed/speed parameters (`F…S…`).
    fn define_tool(&mut self, rest: &str) -> Result<(), ParseErrorKind> {
        let c_pos = rest
            .find('C')
            .ok_or(ParseErrorKind::MissingField("tool diameter"))?;
        let num_str = &rest[..c_pos];
        let tool: u32 = num_str
            .parse()
            .map_err(|_| ParseErrorKind::InvalidNumber(num_str.to_string()))?;

        let after = &rest[c_pos + 1..];
        let end = after
            .find(|c: char| c.is_ascii_alphabetic())
            .unwrap_or(after.len());
        let diameter: f64 = after[..end]
            .parse()
            .map_err(|_| ParseErrorKind::InvalidNumber(after[..end].to_string()))?;
        if !(diameter.is_finite() && diameter > 0.0) {
            return Err(ParseErrorKind::InvalidNumber(after[..end].to_string()));
        }

        self.file.tools.define(ToolId(tool), diameter);
        Ok(())
    }

    fn select_tool(&mut self, rest: &str) -> Result<(), ParseErrorKind> {
        let num: u32 = rest
            .parse()
            .map_err(|_| ParseErrorKind::InvalidNumber(rest.to_string()))?;
        self.close_route();
        // T0 unloads the tool
        self.current_tool = (num != 0).then_some(ToolId(num));
        Ok(())
    }

    /// Coordinate words: `X14.478Y10.541` or `X14478Y10541`. Missing axes
    /// keep their previous value. Returns the new position.
    fn coords(&mut self, words: &str) -> Result<Point, ParseErrorKind> {
        let mut x = None;
        let mut y = None;

        let bytes = words.as_bytes();
        let mut pos = 0;
        while pos < bytes.len() {
            let key = bytes[pos] as char;
            let start = pos + 1;
            let end = words[start..]
                .find(|c: char| c.is_ascii_alphabetic())
                .map(|i| start + i)
                .unwrap_or(words.len());
            match key {
                'X' => x = Some(self.parse_coord_value(&words[start..end])?),
                'Y' => y = Some(self.parse_coord_value(&words[start..end])?),
                // Feed on a routing move
                'F' => {}
                _ => return Err(ParseErrorKind::UnknownCommand),
            }
            pos = end;
        }

        let x = x.or(self.position.0);
        let y = y.or(self.position.1);
        self.position = (x, y);
        match (x, y) {
            (Some(x), Some(y)) => Ok(Point::new(x, y)),
            _ => Err(ParseErrorKind::MissingField("X and Y coordinates")),
        }
    }

    fn selected_tool(&self) -> Result<ToolId, ParseErrorKind> {
        self.current_tool
            .ok_or(ParseErrorKind::MissingField("selected tool"))
    }

    fn hit(&mut self, line: &str, line_no: usize) -> Result<(), ParseErrorKind> {
        let at = self.coords(line)?;
        let tool = self.selected_tool()?;
        self.file.hits.push(DrillHit {
            at,
            tool,
            line: line_no,
        });
        Ok(())
    }

    /// `M15`: the tool goes down at the current position and a slot begins.
    fn plunge(&mut self, line_no: usize) -> Result<(), ParseErrorKind> {
        self.close_route();
        let tool = self.selected_tool()?;
        let (Some(x), Some(y)) = self.position else {
            return Err(ParseErrorKind::MissingField("slot start position"));
        };
        self.route = Some(SlotRoute {
            tool,
            points: vec![Point::new(x, y)],
            line: line_no,
        });
        Ok(())
    }

    /// Linear routing move; extends the open slot when the tool is down.
    fn route_to(&mut self, words: &str) -> Result<(), ParseErrorKind> {
        let to = self.coords(words)?;
        if let Some(route) = self.route.as_mut() {
            if route.points.last().map_or(true, |p| !p.approx_eq(to)) {
                route.points.push(to);
            }
        }
        Ok(())
    }

    /// `X1.0Y1.0G85X2.0Y1.0`: a straight slot between two points.
    fn canned_slot(&mut self, from: &str, to: &str, line_no: usize) -> Result<(), ParseErrorKind> {
        self.close_route();
        let tool = self.selected_tool()?;
        let start = self.coords(from)?;
        let end = self.coords(to)?;
        self.file.routes.push(SlotRoute {
            tool,
            points: vec![start, end],
            line: line_no,
        });
        Ok(())
    }

    /// Finish the open slot. A plunge without any travel is kept as a hit.
    fn close_route(&mut self) {
        let Some(route) = self.route.take() else {
            return;
        };
        if route.points.len() >= 2 {
            self.file.routes.push(route);
        } else if let Some(&at) = route.points.first() {
            self.file.hits.push(DrillHit {
                at,
                tool: route.tool,
                line: route.line,
            });
        }
    }

    fn parse_coord_value(&self, s: &str) -> Result<f64, ParseErrorKind> {
        let invalid = || ParseErrorKind::InvalidNumber(s.to_string());
        if s.is_empty() {
            return Err(invalid());
        }

        if s.contains('.') {
            return s.parse::<f64>().map_err(|_| invalid());
        }

        let negative = s.starts_with('-');
        let digits = s.strip_prefix(['-', '+']).unwrap_or(s);
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }

        let total_digits = (self.format.integer + self.format.decimal) as usize;
        let mut padded = digits.to_string();
        while padded.len() < total_digits {
            match self.zero_sup {
                ZeroSuppression::Trailing => padded.insert(0, '0'),
                ZeroSuppression::Leading => padded.push('0'),
            }
        }

        let raw: i64 = padded.parse().map_err(|_| invalid())?;
        let val = if self.zero_sup == ZeroSuppression::Leading {
            // Left-aligned: the first `integer` digits are the integer part.
            let decimals = padded.len() as i32 - self.format.integer as i32;
            raw as f64 / 10f64.powi(decimals)
        } else {
            raw as f64 / 10f64.powi(self.format.decimal as i32)
        };
        Ok(if negative { -val } else { val })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_basic_excellon() {
        let content = "\
M48
METRIC,TZ,000.000
T11C0.300
T12C0.800
%
T11
X14.478Y10.541
X14.478Y12.191
T12
X15.000Y10.000
M30
";
        let file = parse(content).unwrap();
        assert_eq!(file.tools.len(), 2);
        assert_abs_diff_eq!(file.tools.get(ToolId(12)).unwrap().diameter, 0.8);
        assert_eq!(file.hits.len(), 3);
        assert_eq!(file.hits[0].tool, ToolId(11));
        assert_eq!(file.hits[0].at, Point::new(14.478, 10.541));
        assert_eq!(file.hits[0].line, 7);
        assert_eq!(file.hits[2].tool, ToolId(12));
    }

    #[test]
    fn test_trailing_zeros_kept_pads_left() {
        let content = "M48\nMETRIC,TZ,000.000\nT1C1.0\n%\nT1\nX14478Y-2500\nM30\n";
        let file = parse(content).unwrap();
        assert_abs_diff_eq!(file.hits[0].at.x, 14.478, epsilon = 1e-9);
        assert_abs_diff_eq!(file.hits[0].at.y, -2.5, epsilon = 1e-9);
    }

    #[test]
    fn test_leading_zeros_kept_pads_right() {
        let content = "M48\nMETRIC,LZ,000.000\nT1C1.0\n%\nT1\nX01447Y0105\nM30\n";
        let file = parse(content).unwrap();
        // 01447 -> 014470 -> 014.470
        assert_abs_diff_eq!(file.hits[0].at.x, 14.47, epsilon = 1e-9);
        assert_abs_diff_eq!(file.hits[0].at.y, 10.5, epsilon = 1e-9);
    }

    #[test]
    fn test_modal_coordinates() {
        let content = "M48\nMETRIC\nT1C1.0\n%\nT1\nX1.0Y2.0\nX3.0\nY4.0\nM30\n";
        let file = parse(content).unwrap();
        let pts: Vec<Point> = file.hits.iter().map(|h| h.at).collect();
        assert_eq!(
            pts,
            vec![
                Point::new(1.0, 2.0),
                Point::new(3.0, 2.0),
                Point::new(3.0, 4.0)
            ]
        );
    }

    #[test]
    fn test_tool_defined_in_body() {
        let content = "M48\nMETRIC\n%\nT3C2.5\nT3\nX1.0Y1.0\nM30\n";
        let file = parse(content).unwrap();
        assert_abs_diff_eq!(file.tools.get(ToolId(3)).unwrap().diameter, 2.5);
        assert_eq!(file.hits[0].tool, ToolId(3));
    }

    #[test]
    fn test_tool_with_feed_and_speed() {
        let content = "M48\nMETRIC\nT1C0.800F100S3\n%\nM30\n";
        let file = parse(content).unwrap();
        assert_abs_diff_eq!(file.tools.get(ToolId(1)).unwrap().diameter, 0.8);
    }

    #[test]
    fn test_inch_rejected() {
        let err = parse("M48\nINCH,LZ\nT1C0.04\n%\n").unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::UnsupportedUnits(_)));
        assert_eq!(err.line, 2);
        let err = parse("M48\nM72\n").unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::UnsupportedUnits(_)));
    }

    #[test]
    fn test_routed_slot() {
        // KiCad oval hole: rapid to the start, plunge, route, retract, back to drilling
        let content = "\
M48
METRIC,TZ,000.000
T1C1.0
T2C0.8
%
T1
G00X1.0Y1.0
M15
G01X3.0Y1.0
X3.0Y2.0
M16
G05
T2
X5.0Y5.0
M30
";
        let file = parse(content).unwrap();
        assert_eq!(file.routes.len(), 1);
        let slot = &file.routes[0];
        assert_eq!(slot.tool, ToolId(1));
        assert_eq!(slot.line, 8);
        assert_eq!(
            slot.points,
            vec![
                Point::new(1.0, 1.0),
                Point::new(3.0, 1.0),
                Point::new(3.0, 2.0)
            ]
        );
        // Rapids and route moves are not hits; G05 restores drilling
        assert_eq!(file.hits.len(), 1);
        assert_eq!(file.hits[0].at, Point::new(5.0, 5.0));
        assert_eq!(file.hits[0].tool, ToolId(2));
    }

    #[test]
    fn test_slot_closed_at_end_of_file() {
        let content = "M48\nMETRIC\nT1C1.0\n%\nT1\nG00X0Y0\nM15\nG01X2000Y0F300\nM30\n";
        let file = parse(content).unwrap();
        assert_eq!(file.routes.len(), 1);
        assert_abs_diff_eq!(file.routes[0].points[1].x, 2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_plunge_without_travel_is_a_hit() {
        let content = "M48\nMETRIC\nT1C1.0\n%\nT1\nG00X1.0Y1.0\nM15\nM16\nM30\n";
        let file = parse(content).unwrap();
        assert!(file.routes.is_empty());
        assert_eq!(file.hits.len(), 1);
        assert_eq!(file.hits[0].line, 7);
    }

    #[test]
    fn test_plunge_without_position_rejected() {
        let content = "M48\nMETRIC\nT1C1.0\n%\nT1\nM15\n";
        let err = parse(content).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::MissingField("slot start position"));
        assert_eq!(err.line, 6);
    }

    #[test]
    fn test_routed_arc_rejected() {
        let content = "M48\nMETRIC\nT1C1.0\n%\nT1\nG00X1.0Y1.0\nM15\nG02X2.0Y2.0A1.0\nM16\nM30\n";
        let err = parse(content).unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::Unsupported(_)));
        assert_eq!(err.line, 8);
    }

    #[test]
    fn test_g85_slot() {
        let content = "M48\nMETRIC\nT1C1.0\n%\nT1\nX1.0Y1.0G85X2.0Y1.0\nM30\n";
        let file = parse(content).unwrap();
        assert!(file.hits.is_empty());
        assert_eq!(
            file.routes,
            vec![SlotRoute {
                tool: ToolId(1),
                points: vec![Point::new(1.0, 1.0), Point::new(2.0, 1.0)],
                line: 6,
            }]
        );
    }

    #[test]
    fn test_hit_without_tool_rejected() {
        let content = "M48\nMETRIC\nT1C1.0\n%\nX1.0Y1.0\nM30\n";
        let err = parse(content).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::MissingField("selected tool"));
        assert_eq!(err.line, 5);
    }

    #[test]
    fn test_unknown_tool_is_kept_for_validation() {
        // The hit references T9, which is never defined; grouping reports it.
        let content = "M48\nMETRIC\nT1C1.0\n%\nT9\nX1.0Y1.0\nM30\n";
        let file = parse(content).unwrap();
        assert_eq!(file.hits[0].tool, ToolId(9));
        assert!(file.tools.get(ToolId(9)).is_none());
    }

    #[test]
    fn test_unknown_body_command_rejected() {
        let content = "M48\nMETRIC\n%\nQ12\n";
        let err = parse(content).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnknownCommand);
        assert_eq!(err.line, 4);
    }

    #[test]
    fn test_comments_and_header_options() {
        let content = "M48\n; DRILL file {KiCad 7}\nFMAT,2\nICI,OFF\nMETRIC,TZ\nT1C0.4 ; small\n%\nG90\nG05\nT1\nX1Y1\nT0\nM30\n";
        let file = parse(content).unwrap();
        assert_eq!(file.hits.len(), 1);
        assert_abs_diff_eq!(file.hits[0].at.x, 0.001, epsilon = 1e-12);
    }

    #[test]
    fn test_empty() {
        let err = parse("\n; only a comment\n").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::Empty);
    }
}
