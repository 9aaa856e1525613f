use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::text_util::squash_whitespace;

/// A recurring psychological pattern the story is built around.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommonTrap {
    pub name: String,
    pub description: String,
}

/// A concrete situational template used to ground an opening beat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    pub id: String,
    pub setting: String,
    pub situation: String,
    pub symbolism: String,
}

/// The central question a session keeps returning to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PsychologicalContract {
    pub id: String,
    pub question: String,
    pub theme: String,
    pub astro_indicators: Vec<String>,
    pub common_traps: Vec<CommonTrap>,
    pub scenarios: Vec<Scenario>,
    pub choice_points: Vec<String>,
}

/// Loosely typed shape of a model-produced contract. Every field may be absent.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawContract {
    id: String,
    question: String,
    theme: String,
    astro_indicators: Vec<String>,
    common_traps: Vec<RawTrap>,
    scenarios: Vec<RawScenario>,
    choice_points: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawTrap {
    name: String,
    description: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawScenario {
    id: String,
    setting: String,
    situation: String,
    symbolism: String,
}

/// Why a generated contract was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContractRejection {
    #[error("contract is not a JSON object: {0}")]
    Shape(String),
    #[error("contract field `{0}` is empty")]
    Empty(&'static str),
}

fn clean_list(items: Vec<String>) -> Vec<String> {
    items
        .iter()
        .map(|s| squash_whitespace(s))
        .filter(|s| !s.is_empty())
        .collect()
}

impl PsychologicalContract {
    /// Validate a parsed model reply and normalize it into a contract.
    ///
    /// Blank list entries are dropped before the non-empty checks. A missing
    /// contract id is generated, missing scenario ids are numbered.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ContractRejection> {
        let raw: RawContract =
            serde_json::from_value(value).map_err(|e| ContractRejection::Shape(e.to_string()))?;

        let question = squash_whitespace(&raw.question);
        if question.is_empty() {
            return Err(ContractRejection::Empty("question"));
        }
        let theme = squash_whitespace(&raw.theme);
        if theme.is_empty() {
            return Err(ContractRejection::Empty("theme"));
        }
        let astro_indicators = clean_list(raw.astro_indicators);
        if astro_indicators.is_empty() {
            return Err(ContractRejection::Empty("astroIndicators"));
        }
        let common_traps: Vec<CommonTrap> = raw
            .common_traps
            .into_iter()
            .map(|t| CommonTrap {
                name: squash_whitespace(&t.name),
                description: squash_whitespace(&t.description),
            })
            .filter(|t| !t.name.is_empty())
            .collect();
        if common_traps.is_empty() {
            return Err(ContractRejection::Empty("commonTraps"));
        }
        let scenarios: Vec<Scenario> = raw
            .scenarios
            .into_iter()
            .filter(|s| !squash_whitespace(&s.situation).is_empty())
            .enumerate()
            .map(|(idx, s)| {
                let id = slug(&s.id);
                Scenario {
                    id: if id.is_empty() {
                        format!("scenario-{}", idx + 1)
                    } else {
                        id
                    },
                    setting: squash_whitespace(&s.setting),
                    situation: squash_whitespace(&s.situation),
                    symbolism: squash_whitespace(&s.symbolism),
                }
            })
            .collect();
        if scenarios.is_empty() {
            return Err(ContractRejection::Empty("scenarios"));
        }
        let choice_points = clean_list(raw.choice_points);
        if choice_points.is_empty() {
            return Err(ContractRejection::Empty("choicePoints"));
        }

        let id = slug(&raw.id);
        let id = if id.is_empty() {
            format!("generated-{}", &Uuid::new_v4().simple().to_string()[..8])
        } else {
            id
        };

        Ok(Self {
            id,
            question,
            theme,
            astro_indicators,
            common_traps,
            scenarios,
            choice_points,
        })
    }

    pub fn scenario(&self, id: &str) -> Option<&Scenario> {
        self.scenarios.iter().find(|s| s.id == id)
    }
}

/// Lowercase ASCII slug; other characters collapse into single dashes.
pub fn slug(s: &str) -> String {
    let mut out = String::new();
    for c in s.trim().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') && !out.is_empty() {
            out.push('-');
        }
    }
    out.trim_end_matches('-').to_string()
}

fn trap(name: &str, description: &str) -> CommonTrap {
    CommonTrap {
        name: name.into(),
        description: description.into(),
    }
}

fn scenario(id: &str, setting: &str, situation: &str, symbolism: &str) -> Scenario {
    Scenario {
        id: id.into(),
        setting: setting.into(),
        situation: situation.into(),
        symbolism: symbolism.into(),
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Hand-authored contracts used when generation fails or is rejected.
pub fn fallback_bank() -> Vec<PsychologicalContract> {
    vec![
        PsychologicalContract {
            id: "fear-of-visibility".into(),
            question: "Могу ли я позволить себе быть замеченным, не пряча свою силу?".into(),
            theme: "Страх проявленности".into(),
            astro_indicators: strings(&["Солнце в квадрате к Сатурну", "Луна в 12 доме"]),
            common_traps: vec![
                trap("Тень за чужой спиной", "Отдавать свои идеи другим, чтобы не нести ответственность за успех."),
                trap("Вечная подготовка", "Откладывать выход к людям, пока всё не станет идеальным."),
            ],
            scenarios: vec![
                scenario(
                    "stage-lights",
                    "Старый театр перед премьерой",
                    "Главный актёр исчез, и роль внезапно достаётся тебе.",
                    "Свет софитов как взгляд мира",
                ),
                scenario(
                    "signed-letter",
                    "Редакция ночной газеты",
                    "Твоё анонимное письмо хотят напечатать, но только под настоящим именем.",
                    "Подпись как право на голос",
                ),
            ],
            choice_points: strings(&["Выйти на свет или остаться в тени", "Назвать своё имя вслух"]),
        },
        PsychologicalContract {
            id: "control-vs-trust".into(),
            question: "Что случится, если я отпущу контроль и доверюсь течению?".into(),
            theme: "Контроль и доверие".into(),
            astro_indicators: strings(&["Марс в Деве", "Плутон в аспекте к Луне"]),
            common_traps: vec![
                trap("Всё сам", "Не позволять никому помочь, даже когда силы на исходе."),
                trap("План на каждый случай", "Подменять жизнь бесконечным прогнозированием рисков."),
            ],
            scenarios: vec![
                scenario(
                    "river-crossing",
                    "Переправа через горную реку",
                    "Проводник предлагает отдать ему карту и идти вслепую.",
                    "Течение реки как ход судьбы",
                ),
                scenario(
                    "night-train",
                    "Ночной поезд без расписания",
                    "Поезд свернул с маршрута, и никто не знает, куда он идёт.",
                    "Рельсы, которые прокладывает кто-то другой",
                ),
            ],
            choice_points: strings(&["Передать руль другому", "Сойти с намеченного пути"]),
        },
        PsychologicalContract {
            id: "belonging-vs-self".into(),
            question: "Должен ли я предать себя, чтобы принадлежать?".into(),
            theme: "Принадлежность и подлинность".into(),
            astro_indicators: strings(&["Венера в Раке", "Луна в оппозиции к Урану"]),
            common_traps: vec![
                trap("Хамелеон", "Менять мнения и вкусы под каждую новую компанию."),
                trap("Изгнанник заранее", "Уходить первым, чтобы не быть отвергнутым."),
            ],
            scenarios: vec![
                scenario(
                    "village-feast",
                    "Праздник в незнакомой деревне",
                    "Чтобы остаться на ночлег, нужно принять обычай, который тебе чужд.",
                    "Общий стол как цена тепла",
                ),
                scenario(
                    "masked-ball",
                    "Бал-маскарад в старом особняке",
                    "Хозяйка просит не снимать маску до рассвета, иначе придётся уйти.",
                    "Маска как удобная ложь",
                ),
            ],
            choice_points: strings(&["Снять маску", "Сказать «нет» тем, кто тебе дорог"]),
        },
        PsychologicalContract {
            id: "worth-through-achievement".into(),
            question: "Достоин ли я любви, если ничего не достиг?".into(),
            theme: "Ценность без заслуг".into(),
            astro_indicators: strings(&["Сатурн в 10 доме", "Солнце в Козероге"]),
            common_traps: vec![
                trap("Беговая дорожка", "Сразу ставить новую цель, не прожив радость от прежней."),
                trap("Счёт в конце дня", "Оценивать себя только по количеству сделанного."),
            ],
            scenarios: vec![
                scenario(
                    "empty-workshop",
                    "Мастерская, где сгорели все работы",
                    "Ученики пришли не за уроком, а просто побыть рядом.",
                    "Пепел как конец старого доказательства",
                ),
                scenario(
                    "summit-fog",
                    "Вершина горы в тумане",
                    "Ты дошёл до вершины, но вида нет, и никто не увидит твоего подвига.",
                    "Туман, скрывающий награду",
                ),
            ],
            choice_points: strings(&["Остановиться без причины", "Принять подарок, не заслужив его"]),
        },
        PsychologicalContract {
            id: "anger-as-boundary".into(),
            question: "Имею ли я право на свой гнев?".into(),
            theme: "Гнев как граница".into(),
            astro_indicators: strings(&["Марс в Весах", "Марс в квадрате к Нептуну"]),
            common_traps: vec![
                trap("Вежливая улыбка", "Проглатывать обиду, чтобы сохранить мир любой ценой."),
                trap("Взрыв после тишины", "Молчать до тех пор, пока злость не вырвется разрушительно."),
            ],
            scenarios: vec![
                scenario(
                    "stolen-garden",
                    "Сад, который ты растил годами",
                    "Соседи без спроса срезают твои цветы для своего праздника.",
                    "Ограда как право на своё",
                ),
                scenario(
                    "council-hall",
                    "Зал городского совета",
                    "Твоё предложение присвоили, и зал аплодирует другому.",
                    "Голос, который поднимается над шумом",
                ),
            ],
            choice_points: strings(&["Повысить голос", "Назвать то, что тебя ранило"]),
        },
    ]
}
