//! Brazilian federative units and name folding.

/// Two-letter code and full name of each of the 27 federative units.
pub const STATES: &[(&str, &str)] = &[
    ("AC", "Acre"),
    ("AL", "Alagoas"),
    ("AP", "Amapá"),
    ("AM", "Amazonas"),
    ("BA", "Bahia"),
    ("CE", "Ceará"),
    ("DF", "Distrito Federal"),
    ("ES", "Espírito Santo"),
    ("GO", "Goiás"),
    ("MA", "Maranhão"),
    ("MT", "Mato Grosso"),
    ("MS", "Mato Grosso do Sul"),
    ("MG", "Minas Gerais"),
    ("PA", "Pará"),
    ("PB", "Paraíba"),
    ("PR", "Paraná"),
    ("PE", "Pernambuco"),
    ("PI", "Piauí"),
    ("RJ", "Rio de Janeiro"),
    ("RN", "Rio Grande do Norte"),
    ("RS", "Rio Grande do Sul"),
    ("RO", "Rondônia"),
    ("RR", "Roraima"),
    ("SC", "Santa Catarina"),
    ("SP", "São Paulo"),
    ("SE", "Sergipe"),
    ("TO", "Tocantins"),
];

/// Two-letter code for a state given as a code or a full name.
///
/// Case, accents and extra whitespace are ignored. Anything that is not a
/// federative unit yields `None`.
///
/// ```
/// use rota_core::state_code;
///
/// assert_eq!(state_code("ce"), Some("CE"));
/// assert_eq!(state_code("CEARÁ"), Some("CE"));
/// assert_eq!(state_code("Atlantis"), None);
/// ```
#[must_use]
pub fn state_code(raw: &str) -> Option<&'static str> {
    let folded = fold_name(raw);
    if folded.is_empty() {
        return None;
    }

    STATES
        .iter()
        .find(|(code, name)| code.eq_ignore_ascii_case(&folded) || fold_name(name) == folded)
        .map(|&(code, _)| code)
}

/// Lowercase, fold Portuguese accents, turn hyphens into spaces and collapse
/// whitespace.
#[must_use]
pub fn fold_name(name: &str) -> String {
    let folded: String = name
        .chars()
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            'ñ' => 'n',
            '-' => ' ',
            other => other,
        })
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_accents_and_spacing() {
        assert_eq!(fold_name("  São   Gonçalo do Amarante "), "sao goncalo do amarante");
        assert_eq!(fold_name("EUSÉBIO"), "eusebio");
        assert_eq!(fold_name("Maracanaú"), "maracanau");
    }

    #[test]
    fn test_state_code_from_code_or_name() {
        assert_eq!(state_code(" rn "), Some("RN"));
        assert_eq!(state_code("Ceará"), Some("CE"));
        assert_eq!(state_code("CEARÁ"), Some("CE"));
        assert_eq!(state_code("sao paulo"), Some("SP"));
        assert_eq!(state_code("Rio Grande do Sul"), Some("RS"));
        assert_eq!(state_code("Mato Grosso do Sul"), Some("MS"));
    }

    #[test]
    fn test_state_code_rejects_unknown() {
        assert_eq!(state_code(""), None);
        assert_eq!(state_code("XX"), None);
        assert_eq!(state_code("Lisboa"), None);
    }

    #[test]
    fn test_table_is_complete() {
        assert_eq!(STATES.len(), 27);
    }
}
