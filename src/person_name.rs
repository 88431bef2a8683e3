/// Alternate renderings of a person name, in value order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Group {
    Alphabetic,
    Ideographic,
    Phonetic,
}

impl Group {
    pub const ALL: [Group; 3] = [Group::Alphabetic, Group::Ideographic, Group::Phonetic];

    pub fn element_name(self) -> &'static str {
        match self {
            Group::Alphabetic => "Alphabetic",
            Group::Ideographic => "Ideographic",
            Group::Phonetic => "Phonetic",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    FamilyName,
    GivenName,
    MiddleName,
    NamePrefix,
    NameSuffix,
}

impl Component {
    pub const ALL: [Component; 5] = [
        Component::FamilyName,
        Component::GivenName,
        Component::MiddleName,
        Component::NamePrefix,
        Component::NameSuffix,
    ];

    pub fn element_name(self) -> &'static str {
        match self {
            Component::FamilyName => "FamilyName",
            Component::GivenName => "GivenName",
            Component::MiddleName => "MiddleName",
            Component::NamePrefix => "NamePrefix",
            Component::NameSuffix => "NameSuffix",
        }
    }
}

/// A PN value split into `=`-separated groups of `^`-separated components.
///
/// Parsing is lenient: extra groups or components are ignored rather than
/// rejected, and every component is trimmed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersonName {
    groups: [[Option<String>; 5]; 3],
}

impl PersonName {
    pub fn parse(value: &str) -> Self {
        let mut name = PersonName::default();
        for (g, group) in value.split('=').take(3).enumerate() {
            for (c, component) in group.split('^').take(5).enumerate() {
                let component = component.trim();
                if !component.is_empty() {
                    name.groups[g][c] = Some(component.to_string());
                }
            }
        }
        name
    }

    pub fn get(&self, group: Group, component: Component) -> Option<&str> {
        self.groups[group as usize][component as usize].as_deref()
    }

    pub fn contains(&self, group: Group) -> bool {
        self.groups[group as usize].iter().any(Option::is_some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_alphabetic_components() {
        let pn = PersonName::parse("Doe^John^Q^Dr^Jr");
        assert_eq!(pn.get(Group::Alphabetic, Component::FamilyName), Some("Doe"));
        assert_eq!(pn.get(Group::Alphabetic, Component::GivenName), Some("John"));
        assert_eq!(pn.get(Group::Alphabetic, Component::MiddleName), Some("Q"));
        assert_eq!(pn.get(Group::Alphabetic, Component::NamePrefix), Some("Dr"));
        assert_eq!(pn.get(Group::Alphabetic, Component::NameSuffix), Some("Jr"));
        assert!(!pn.contains(Group::Ideographic));
        assert!(!pn.contains(Group::Phonetic));
    }

    #[test]
    fn skipped_groups_stay_absent() {
        let pn = PersonName::parse("Yamada^Tarou==やまだ^たろう");
        assert!(pn.contains(Group::Alphabetic));
        assert!(!pn.contains(Group::Ideographic));
        assert!(pn.contains(Group::Phonetic));
        assert_eq!(pn.get(Group::Phonetic, Component::GivenName), Some("たろう"));
    }

    #[test]
    fn blank_components_are_absent() {
        let pn = PersonName::parse("Doe^ ^^^");
        assert_eq!(pn.get(Group::Alphabetic, Component::GivenName), None);
        assert_eq!(pn.get(Group::Alphabetic, Component::FamilyName), Some("Doe"));
    }

    #[test]
    fn extra_groups_are_ignored() {
        let pn = PersonName::parse("a=b=c=d");
        assert_eq!(pn.get(Group::Phonetic, Component::FamilyName), Some("c"));
    }

    #[test]
    fn empty_value_has_no_groups() {
        let pn = PersonName::parse("");
        assert!(Group::ALL.iter().all(|g| !pn.contains(*g)));
    }
}
