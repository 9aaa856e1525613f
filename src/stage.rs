use serde::{Deserialize, Serialize};

/// Fixed dramaturgical stages an arc can fall into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Immersion,
    Conflict,
    Reflection,
    Trial,
    Turn,
    Finale,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Immersion,
        Stage::Conflict,
        Stage::Reflection,
        Stage::Trial,
        Stage::Turn,
        Stage::Finale,
    ];

    /// Stage for a 1-based arc number, clamped to the last stage.
    pub fn for_arc(arc: u32) -> Stage {
        let idx = (arc.max(1) - 1) as usize;
        Self::ALL[idx.min(Self::ALL.len() - 1)]
    }

    pub fn label(self) -> &'static str {
        match self {
            Stage::Immersion => "Погружение",
            Stage::Conflict => "Конфликт",
            Stage::Reflection => "Рефлексия",
            Stage::Trial => "Испытание",
            Stage::Turn => "Поворот",
            Stage::Finale => "Финал",
        }
    }

    pub fn directive(self) -> &'static str {
        match self {
            Stage::Immersion => {
                "Введи героя в мир истории: место, атмосфера, первое смутное ощущение внутреннего вопроса."
            }
            Stage::Conflict => {
                "Столкни героя с силой, которая задевает его уязвимость. Напряжение должно стать ощутимым."
            }
            Stage::Reflection => {
                "Дай герою паузу: он замечает в себе знакомый паттерн и впервые называет его."
            }
            Stage::Trial => {
                "Испытай героя действием: старая стратегия больше не работает, цена выбора растёт."
            }
            Stage::Turn => {
                "Создай поворот: неожиданная правда или встреча меняет смысл всего, что было раньше."
            }
            Stage::Finale => {
                "Подведи историю к развязке: герой отвечает на главный вопрос своим поступком."
            }
        }
    }
}
