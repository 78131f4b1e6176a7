// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Rendering the listing with ratatui. Pure view over [`ListModel`]; both the
//! local terminal and served sessions draw through here.

use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::Paragraph;
use ratatui::Frame;

use super::{item::Item, ListModel};

const TITLE: &str = "Directory Listing";

fn title_style() -> Style {
    Style::default()
        .fg(Color::Magenta)
        .add_modifier(Modifier::BOLD)
}

fn selected_style() -> Style {
    Style::default()
        .fg(Color::Magenta)
        .add_modifier(Modifier::BOLD)
}

fn row_style() -> Style {
    Style::default().fg(Color::Gray)
}

fn placeholder_style() -> Style {
    Style::default()
        .fg(Color::DarkGray)
        .add_modifier(Modifier::ITALIC)
}

fn help_style() -> Style {
    Style::default().fg(Color::DarkGray)
}

/// Draws the whole listing frame: form, error pane or the list itself.
pub fn draw(frame: &mut Frame, model: &ListModel) {
    let area = frame.area();

    if let Some(form) = model.form() {
        draw_form(frame, area, form);
        return;
    }
    if let Some(err) = model.error() {
        draw_error(frame, area, err);
        return;
    }
    draw_list(frame, area, model);
}

fn draw_list(frame: &mut Frame, area: Rect, model: &ListModel) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2),
            Constraint::Min(1),
            Constraint::Length(1),
        ])
        .split(area);

    let header = match model.filter_line() {
        Some(filter) => vec![
            Line::styled(TITLE, title_style()),
            Line::styled(filter, row_style()),
        ],
        None => vec![Line::styled(TITLE, title_style()), Line::default()],
    };
    frame.render_widget(Paragraph::new(header), chunks[0]);

    let visible = model.visible();
    let item_height = model.features().item_height() + 1; // blank line between items
    let rows_available = chunks[1].height as usize;
    let per_screen = (rows_available / item_height).max(1);
    let selected = model.selected_position();
    let first = selected.saturating_sub(per_screen.saturating_sub(1));

    let mut lines: Vec<Line> = Vec::with_capacity(rows_available);
    for (position, &index) in visible.iter().enumerate().skip(first) {
        if lines.len() + item_height > rows_available && position > first {
            break;
        }
        push_item_lines(&mut lines, &model.items()[index], position == selected);
    }
    if visible.is_empty() {
        lines.push(Line::styled("no endpoints", placeholder_style()));
    }
    frame.render_widget(Paragraph::new(lines), chunks[1]);

    let mut help = String::from("enter/o connect • / filter • q quit");
    if model.is_local() {
        help.push_str(" • y copy • n new • e edit");
    }
    frame.render_widget(
        Paragraph::new(Line::styled(help, help_style())),
        chunks[2],
    );
}

fn push_item_lines(lines: &mut Vec<Line>, item: &Item, selected: bool) {
    let marker = if selected { "│ " } else { "  " };
    let title_style = if selected { selected_style() } else { row_style() };

    lines.push(Line::from(vec![
        Span::styled(marker, selected_style()),
        Span::styled(item.title().to_string(), title_style),
    ]));
    for row in &item.rows {
        let style = if row.placeholder {
            placeholder_style()
        } else {
            help_style()
        };
        lines.push(Line::from(vec![
            Span::styled(marker, selected_style()),
            Span::styled(row.text.clone(), style),
        ]));
    }
    lines.push(Line::default());
}

fn draw_error(frame: &mut Frame, area: Rect, err: &str) {
    let lines = vec![
        Line::styled(TITLE, title_style()),
        Line::default(),
        Line::from("Something went wrong:"),
        Line::default(),
        Line::styled(err.to_string(), Style::default().fg(Color::Red)),
        Line::default(),
        Line::styled("Press any key to go back to the list.", help_style()),
    ];
    frame.render_widget(Paragraph::new(lines), area);
}

fn draw_form(frame: &mut Frame, area: Rect, form: &super::form::FormModel) {
    let mut lines = vec![Line::styled("Connect to a host", title_style()), Line::default()];

    for (label, value, focused) in form.rows() {
        let style = if focused { selected_style() } else { row_style() };
        lines.push(Line::from(vec![
            Span::styled(if focused { "> " } else { "  " }, selected_style()),
            Span::styled(format!("{label}: "), style),
            Span::styled(value, row_style()),
        ]));
    }

    lines.push(Line::default());
    if let Some(err) = form.error() {
        lines.push(Line::styled(err.to_string(), Style::default().fg(Color::Red)));
    }
    let hint = if form.advanced() {
        "tab next • space toggle • enter connect • ctrl-a basic • esc cancel"
    } else {
        "tab next • enter connect • ctrl-a advanced • esc cancel"
    };
    lines.push(Line::styled(hint, help_style()));

    frame.render_widget(Paragraph::new(lines), area);
}
