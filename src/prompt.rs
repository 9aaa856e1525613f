//! Prompt composition for arcs, finales and contract generation.

use std::fmt::Write;

use crate::chart::NatalChart;
use crate::contract::{PsychologicalContract, Scenario};
use crate::message::{ContextSegment, HistoryStoryOption};
use crate::pipeline::AuthorPersona;
use crate::stage::Stage;

/// Everything an arc or finale prompt is built from.
#[derive(Debug, Clone, Copy)]
pub struct StoryPromptInput<'a> {
    pub author: &'a AuthorPersona,
    pub arc_limit: u32,
    pub current_arc: u32,
    pub contract: &'a str,
    pub active_contract: Option<&'a PsychologicalContract>,
    pub scenario: Option<&'a Scenario>,
    pub current_choice: Option<&'a HistoryStoryOption>,
    pub summary: Option<&'a str>,
    pub segments: &'a [ContextSegment],
}

const FORMAT_RULES: &str = "Правила ответа:
- Ответ — один JSON-объект, без markdown и без ``` .
- Каждое строковое значение пиши в одну строку, без переносов строк внутри.
- Не используй двойные кавычки внутри текста, заменяй их «ёлочками».";

pub fn story_system(author: &AuthorPersona) -> String {
    format!(
        "Ты — {}, автор интерактивных историй в жанре «{}». {} Ты ведёшь читателя через психологическую историю, где каждый выбор раскрывает его внутренний вопрос. Отвечай строго валидным JSON.",
        author.name, author.genre, author.style_prompt
    )
}

fn input_block(out: &mut String, input: &StoryPromptInput<'_>) {
    let _ = writeln!(out, "ВХОДНЫЕ ДАННЫЕ");
    let _ = writeln!(out, "Автор: {}", input.author.name);
    let _ = writeln!(out, "Жанр: {}", input.author.genre);
    let _ = writeln!(out, "Всего арок: {}", input.arc_limit);
    out.push('\n');
}

fn contract_block(out: &mut String, input: &StoryPromptInput<'_>) {
    if input.contract.trim().is_empty() && input.active_contract.is_none() {
        return;
    }
    let _ = writeln!(out, "ПСИХОЛОГИЧЕСКИЙ КОНТРАКТ");
    if !input.contract.trim().is_empty() {
        let _ = writeln!(out, "Главный вопрос: {}", input.contract.trim());
    }
    if let Some(c) = input.active_contract {
        let _ = writeln!(out, "Тема: {}", c.theme);
        let traps: Vec<_> = c
            .common_traps
            .iter()
            .map(|t| format!("{} ({})", t.name, t.description))
            .collect();
        let _ = writeln!(out, "Ловушки героя: {}", traps.join("; "));
        let _ = writeln!(out, "Точки выбора: {}", c.choice_points.join("; "));
    }
    if let Some(s) = input.scenario {
        let _ = writeln!(out, "Сценарий для первой арки:");
        let _ = writeln!(out, "- Место: {}", s.setting);
        let _ = writeln!(out, "- Ситуация: {}", s.situation);
        let _ = writeln!(out, "- Символ: {}", s.symbolism);
    }
    out.push('\n');
}

fn story_so_far(out: &mut String, input: &StoryPromptInput<'_>) {
    if input.summary.is_none() && input.segments.is_empty() {
        return;
    }
    let _ = writeln!(out, "ИСТОРИЯ ДО ЭТОГО МОМЕНТА");
    if let Some(summary) = input.summary {
        let _ = writeln!(out, "Кратко о начале: {summary}");
    }
    for seg in input.segments {
        let _ = write!(out, "Арка {}: {}", seg.arc, seg.text.trim());
        if let Some(title) = &seg.option_title {
            let _ = write!(out, " [выбор читателя: {title}");
            if let Some(desc) = &seg.option_description {
                let _ = write!(out, " — {desc}");
            }
            out.push(']');
        }
        out.push('\n');
    }
    out.push('\n');
}

fn choice_block(out: &mut String, input: &StoryPromptInput<'_>) {
    match input.current_choice {
        Some(choice) => {
            let _ = writeln!(out, "ПРЕДЫДУЩИЙ ВЫБОР");
            let _ = writeln!(
                out,
                "Читатель выбрал: «{}» — {}. Продолжи историю как прямое следствие этого выбора, не пересказывая его.",
                choice.title, choice.description
            );
        }
        None => {
            let _ = writeln!(out, "НАЧАЛО");
            let _ = writeln!(out, "Это первая сцена, выбора ещё не было.");
        }
    }
    out.push('\n');
}

/// User prompt for one arc.
pub fn arc_prompt(input: &StoryPromptInput<'_>, stage: Stage, chart: Option<&NatalChart>) -> String {
    let mut out = String::new();
    input_block(&mut out, input);
    contract_block(&mut out, input);
    if let Some(chart) = chart.filter(|c| !c.core_placements.trim().is_empty()) {
        let _ = writeln!(out, "НАТАЛЬНАЯ КАРТА ЧИТАТЕЛЯ (кратко)\n{}\n", chart.core_placements.trim());
    }
    let _ = writeln!(
        out,
        "ЭТАП: {} (арка {} из {})\n{}\n",
        stage.label(),
        input.current_arc,
        input.arc_limit,
        stage.directive()
    );
    choice_block(&mut out, input);
    story_so_far(&mut out, input);
    let _ = writeln!(out, "ФОРМАТ ОТВЕТА");
    let _ = writeln!(
        out,
        r#"{{"meta":{{"title":"название истории","genre":"жанр","contract":"главный вопрос"}},"node":{{"scene":"текст сцены, 600-900 символов"}},"options":[{{"id":"a","title":"до 48 символов","description":"до 140 символов"}},{{"id":"b","title":"до 48 символов","description":"до 140 символов"}}]}}"#
    );
    let _ = writeln!(out, "Ровно два варианта выбора, оба продолжают тему контракта по-разному.");
    out.push_str(FORMAT_RULES);
    out
}

/// User prompt for the closing chunk.
pub fn finale_prompt(input: &StoryPromptInput<'_>, chart: Option<&NatalChart>) -> String {
    let mut out = String::new();
    input_block(&mut out, input);
    contract_block(&mut out, input);
    if let Some(chart) = chart {
        let _ = writeln!(out, "НАТАЛЬНАЯ КАРТА ЧИТАТЕЛЯ\n{}", chart.render());
    }
    let _ = writeln!(
        out,
        "ЭТАП: {}\n{}\n",
        Stage::Finale.label(),
        Stage::Finale.directive()
    );
    choice_block(&mut out, input);
    story_so_far(&mut out, input);
    let _ = writeln!(out, "ФОРМАТ ОТВЕТА");
    let _ = writeln!(
        out,
        r#"{{"meta":{{"title":"название истории","genre":"жанр","contract":"главный вопрос"}},"finale":{{"resolution":"развязка истории","humanInterpretation":"что эта история говорит о читателе","astrologicalInterpretation":"как история связана с его картой"}}}}"#
    );
    out.push_str(FORMAT_RULES);
    out
}

pub const CONTRACT_SYSTEM: &str = "Ты — психолог и астролог. Ты формулируешь психологический контракт: центральный внутренний вопрос человека, на котором строится интерактивная история. Отвечай строго валидным JSON.";

/// User prompt asking for a fresh contract, steering away from recent ones.
pub fn contract_prompt(
    recent_ids: &[String],
    recent_pairs: &[(String, String)],
    chart: Option<&NatalChart>,
) -> String {
    let mut out = String::new();
    if let Some(chart) = chart {
        let _ = writeln!(out, "НАТАЛЬНАЯ КАРТА\n{}", chart.render());
    }
    if !recent_ids.is_empty() {
        let _ = writeln!(
            out,
            "Недавно использованные контракты (не повторяй их): {}",
            recent_ids.join(", ")
        );
    }
    if !recent_pairs.is_empty() {
        let pairs: Vec<_> = recent_pairs.iter().map(|(c, s)| format!("{c}/{s}")).collect();
        let _ = writeln!(
            out,
            "Недавние пары контракт/сценарий (придумай другие ситуации): {}",
            pairs.join(", ")
        );
    }
    if !out.is_empty() {
        out.push('\n');
    }
    let _ = writeln!(out, "Сформулируй один психологический контракт в формате:");
    let _ = writeln!(
        out,
        r#"{{"id":"slug-latinicей","question":"главный вопрос","theme":"тема","astroIndicators":["астрологический признак"],"commonTraps":[{{"name":"ловушка","description":"описание"}}],"scenarios":[{{"id":"slug","setting":"место","situation":"ситуация","symbolism":"символ"}}],"choicePoints":["точка выбора"]}}"#
    );
    let _ = writeln!(
        out,
        "Все списки непустые: минимум один астрологический признак, одна ловушка, два-три сценария, одна точка выбора."
    );
    out.push_str(FORMAT_RULES);
    out
}
