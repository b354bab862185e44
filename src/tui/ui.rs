//! UI rendering for the debugger.

use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Paragraph, List, ListItem},
    style::{Color, Style, Modifier},
};
use crate::cpu::registers::register_name;
use crate::cpu::execute::FlagView;
use super::app::DebuggerApp;

/// Main draw function.
pub fn draw(frame: &mut Frame, app: &DebuggerApp) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(55),
            Constraint::Percentage(45),
        ])
        .split(frame.area());

    // Left side: code, registers and status
    let left_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(10),
            Constraint::Length(7),
            Constraint::Length(3),
        ])
        .split(chunks[0]);

    draw_disassembly(frame, left_chunks[0], app);
    draw_registers(frame, left_chunks[1], app);
    draw_status(frame, left_chunks[2], app);

    // Right side: machine state, memory and help
    let right_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(7),
            Constraint::Length(10),
            Constraint::Min(6),
            Constraint::Length(4),
        ])
        .split(chunks[1]);

    draw_machine(frame, right_chunks[0], app);
    draw_recent_memory(frame, right_chunks[1], app);
    draw_memory(frame, right_chunks[2], app);
    draw_help(frame, right_chunks[3]);
}

fn draw_disassembly(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let disasm = app.get_disassembly((area.height as usize).saturating_sub(2));

    let items: Vec<ListItem> = disasm
        .iter()
        .map(|line| {
            let prefix = if line.is_current { "▶ " } else { "  " };
            let has_bp = app.breakpoints.contains(&line.physical);
            let bp = if has_bp { "●" } else { " " };
            let text = format!(
                "{} {}{:04X}:{:04X}  {:04X}  {}",
                bp, prefix, line.cs, line.offset, line.word, line.text
            );

            let style = if line.is_current {
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
            } else if has_bp {
                Style::default().fg(Color::Red)
            } else {
                Style::default()
            };

            ListItem::new(text).style(style)
        })
        .collect();

    let list = List::new(items)
        .block(Block::default()
            .title(" Disassembly ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan)));

    frame.render_widget(list, area);
}

/// R0-R15 in four rows.
fn draw_registers(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let content: Vec<Line> = (0..4u8)
        .map(|row| {
            let spans: Vec<Span> = (0..4u8)
                .flat_map(|col| {
                    let idx = row * 4 + col;
                    let value = app.cpu.regs.get(idx);
                    let style = if idx == 15 {
                        Style::default().fg(Color::Yellow)
                    } else if value == 0 {
                        Style::default().fg(Color::DarkGray)
                    } else {
                        Style::default().fg(Color::White)
                    };
                    [
                        Span::raw(format!("{:>3}: ", register_name(idx))),
                        Span::styled(format!("{:04X}  ", value), style),
                    ]
                })
                .collect();
            Line::from(spans)
        })
        .collect();

    let paragraph = Paragraph::new(content)
        .block(Block::default()
            .title(" Registers ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Green)));

    frame.render_widget(paragraph, area);
}

/// PSW flags, segments, shadow slots and run state.
fn draw_machine(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let regs = &app.cpu.regs;
    let flags = FlagView::from(regs.psw);
    let flag = |name: &'static str, on: bool| {
        Span::styled(
            format!("{} ", name),
            if on { Style::default().fg(Color::Green).add_modifier(Modifier::BOLD) }
            else { Style::default().fg(Color::DarkGray) },
        )
    };

    let content = vec![
        Line::from(vec![
            Span::raw(format!("PSW: {:04X}  ", regs.psw.bits())),
            flag("N", flags.n),
            flag("Z", flags.z),
            flag("V", flags.v),
            flag("C", flags.c),
            flag("I", flags.i),
            flag("S", flags.s),
        ]),
        Line::from(format!(
            "SR: {}{}  ER: {}{}",
            flags.stack_reg,
            if flags.dual_stack { " (dual)" } else { "" },
            flags.extra_reg,
            if flags.dual_extra { " (dual)" } else { "" },
        )),
        Line::from(format!(
            "CS: {:04X}  DS: {:04X}  SS: {:04X}  ES: {:04X}",
            regs.seg.cs, regs.seg.ds, regs.seg.ss, regs.seg.es
        )),
        Line::from(format!(
            "PSW': {:04X}  PC': {:04X}  CS': {:04X}",
            regs.shadow.psw, regs.shadow.pc, regs.shadow.cs
        )),
        Line::from(vec![
            Span::raw("Cycles: "),
            Span::styled(format!("{}", app.cpu.cycles), Style::default().fg(Color::Cyan)),
            Span::raw("   State: "),
            Span::styled(format!("{:?}", app.cpu.state),
                if app.cpu.is_running() {
                    Style::default().fg(Color::Green)
                } else {
                    Style::default().fg(Color::Red)
                }),
            Span::raw(format!("   Screen writes: {}", app.screen_writes)),
        ]),
    ];

    let paragraph = Paragraph::new(content)
        .block(Block::default()
            .title(" Machine ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Green)));

    frame.render_widget(paragraph, area);
}

/// Words around the last data access.
fn draw_recent_memory(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let items: Vec<ListItem> = app
        .cpu
        .recent_memory_view()
        .into_iter()
        .map(|cell| {
            let style = if cell.is_current {
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(Color::White)
            };
            ListItem::new(format!("{:05X}: {:04X}", cell.address, cell.value)).style(style)
        })
        .collect();

    let title = match app.cpu.last_access() {
        Some(access) => format!(" Last access: {:?} {:05X} ", access.kind, access.address),
        None => " Last access ".to_string(),
    };

    let list = List::new(items)
        .block(Block::default()
            .title(title)
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Magenta)));

    frame.render_widget(list, area);
}

fn draw_memory(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let visible_rows = (area.height as usize).saturating_sub(2);
    let pc_addr = app.cpu.regs.fetch_address();

    let items: Vec<ListItem> = app
        .cpu
        .mem
        .dump(app.mem_scroll, visible_rows)
        .into_iter()
        .map(|(addr, value)| {
            let style = if addr == pc_addr {
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
            } else if value != 0xFFFF {
                Style::default().fg(Color::White)
            } else {
                Style::default().fg(Color::DarkGray)
            };
            ListItem::new(format!("{:05X}: {:04X}", addr, value)).style(style)
        })
        .collect();

    let list = List::new(items)
        .block(Block::default()
            .title(" Memory ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Magenta)));

    frame.render_widget(list, area);
}

fn draw_status(frame: &mut Frame, area: Rect, app: &DebuggerApp) {
    let status = Paragraph::new(app.status.clone())
        .style(Style::default().fg(Color::White))
        .block(Block::default()
            .title(" Status ")
            .borders(Borders::ALL));

    frame.render_widget(status, area);
}

fn draw_help(frame: &mut Frame, area: Rect) {
    let help = Paragraph::new(vec![
        Line::from("s: Step  r: Run  p: Pause  b: Breakpoint  x: Reset"),
        Line::from("a: Follow access  ↑↓ PgUp/PgDn: Scroll  q: Quit"),
    ])
    .style(Style::default().fg(Color::DarkGray))
    .block(Block::default()
        .title(" Help ")
        .borders(Borders::ALL));

    frame.render_widget(help, area);
}
