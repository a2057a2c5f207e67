//! Terminal presentation for the backup CLI.

use clap::builder::styling::{AnsiColor, Color, Style};
use clap::builder::Styles;
use crossterm::style::{Attribute, Stylize};
use unicode_width::UnicodeWidthStr;

pub fn get_styles() -> Styles {
    let heading = Style::new()
        .bold()
        .underline()
        .fg_color(Some(Color::Ansi(AnsiColor::Cyan)));
    let good = Style::new()
        .bold()
        .fg_color(Some(Color::Ansi(AnsiColor::Green)));
    let bad = Style::new()
        .bold()
        .fg_color(Some(Color::Ansi(AnsiColor::Red)));

    Styles::styled()
        .usage(heading)
        .header(heading)
        .literal(good)
        .valid(good)
        .invalid(bad)
        .error(bad)
        .placeholder(Style::new().fg_color(Some(Color::Ansi(AnsiColor::BrightBlack))))
}

pub mod colors {
    use crossterm::style::Color;

    pub const ACCENT: Color = Color::Rgb {
        r: 0,
        g: 200,
        b: 220,
    };
    pub const GREEN: Color = Color::Rgb {
        r: 0,
        g: 230,
        b: 120,
    };
    pub const ORANGE: Color = Color::Rgb {
        r: 255,
        g: 165,
        b: 0,
    };
    pub const RED: Color = Color::Rgb {
        r: 255,
        g: 85,
        b: 85,
    };
    pub const DIM: Color = Color::Rgb {
        r: 128,
        g: 128,
        b: 128,
    };
    pub const WHITE: Color = Color::Rgb {
        r: 240,
        g: 240,
        b: 240,
    };
}

mod glyphs {
    pub const TOP_LEFT: &str = "╭";
    pub const TOP_RIGHT: &str = "╮";
    pub const BOTTOM_LEFT: &str = "╰";
    pub const BOTTOM_RIGHT: &str = "╯";
    pub const HORIZONTAL: &str = "─";
    pub const VERTICAL: &str = "│";
    pub const T_LEFT: &str = "├";
    pub const T_RIGHT: &str = "┤";
    pub const T_TOP: &str = "┬";
    pub const T_BOTTOM: &str = "┴";
    pub const CROSS: &str = "┼";
    pub const BULLET: &str = "●";
    pub const BULLET_EMPTY: &str = "○";
    pub const CHECK: &str = "✓";
    pub const CROSS_MARK: &str = "✗";
}

const SECTION_WIDTH: usize = 60;

pub fn print_success(message: &str) {
    println!(
        " {} {}",
        glyphs::CHECK.with(colors::GREEN).bold(),
        message.with(colors::GREEN)
    );
}

pub fn print_error(message: &str) {
    eprintln!(
        " {} {}",
        glyphs::CROSS_MARK.with(colors::RED).bold(),
        message.with(colors::RED)
    );
}

pub fn print_warning(message: &str) {
    println!(
        " {} {}",
        "⚠".with(colors::ORANGE).bold(),
        message.with(colors::ORANGE)
    );
}

pub fn print_section_header(title: &str) {
    let used = title.width() + 4;
    let left = SECTION_WIDTH.saturating_sub(used) / 2;
    let right = SECTION_WIDTH.saturating_sub(used + left);

    println!();
    println!(
        "{}{} {} {}{}",
        glyphs::TOP_LEFT.with(colors::ACCENT),
        glyphs::HORIZONTAL.repeat(left).with(colors::ACCENT),
        title.with(colors::ACCENT).bold(),
        glyphs::HORIZONTAL.repeat(right).with(colors::ACCENT),
        glyphs::TOP_RIGHT.with(colors::ACCENT)
    );
}

pub fn print_section_footer() {
    println!(
        "{}{}{}",
        glyphs::BOTTOM_LEFT.with(colors::ACCENT),
        glyphs::HORIZONTAL.repeat(SECTION_WIDTH).with(colors::ACCENT),
        glyphs::BOTTOM_RIGHT.with(colors::ACCENT)
    );
    println!();
}

pub fn print_key_value(key: &str, value: &str) {
    println!(
        "  {} {} {}",
        glyphs::BULLET.with(colors::ACCENT),
        format!("{}:", key).with(colors::DIM),
        value.with(colors::WHITE)
    );
}

pub fn print_empty_list(message: &str) {
    println!(
        "  {} {}",
        glyphs::BULLET_EMPTY.with(colors::DIM),
        message.with(colors::DIM).attribute(Attribute::Italic)
    );
}

pub struct TableBuilder {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    col_widths: Vec<usize>,
}

impl TableBuilder {
    pub fn new(headers: &[&str]) -> Self {
        TableBuilder {
            col_widths: headers.iter().map(|h| h.width()).collect(),
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn add_row(&mut self, row: Vec<String>) {
        for (width, cell) in self.col_widths.iter_mut().zip(&row) {
            *width = (*width).max(cell.width());
        }
        self.rows.push(row);
    }

    fn print_border(&self, left: &str, middle: &str, right: &str) {
        let segments: Vec<String> = self
            .col_widths
            .iter()
            .map(|w| glyphs::HORIZONTAL.repeat(w + 2))
            .collect();
        println!(
            "{}",
            format!("{}{}{}", left, segments.join(middle), right).with(colors::ACCENT)
        );
    }

    fn print_cells(&self, cells: &[String], header: bool) {
        print!("{}", glyphs::VERTICAL.with(colors::ACCENT));
        for (i, width) in self.col_widths.iter().enumerate() {
            let cell = cells.get(i).map(String::as_str).unwrap_or("");
            let padding = " ".repeat(width.saturating_sub(cell.width()));
            if header {
                print!(" {}{} ", cell.with(colors::ACCENT).bold(), padding);
            } else {
                print!(" {}{} ", cell.with(colors::WHITE), padding);
            }
            print!("{}", glyphs::VERTICAL.with(colors::ACCENT));
        }
        println!();
    }

    pub fn print(&self) {
        self.print_border(glyphs::TOP_LEFT, glyphs::T_TOP, glyphs::TOP_RIGHT);
        self.print_cells(&self.headers, true);
        self.print_border(glyphs::T_LEFT, glyphs::CROSS, glyphs::T_RIGHT);
        for row in &self.rows {
            self.print_cells(row, false);
        }
        self.print_border(glyphs::BOTTOM_LEFT, glyphs::T_BOTTOM, glyphs::BOTTOM_RIGHT);
    }
}
